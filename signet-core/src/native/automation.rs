//! Capability seams for talking to the running mail client.
//!
//! - [`AutomationBridge`]: scripting access used by account discovery, with
//!   an explicit availability probe so the file-based fallback is an
//!   ordinary branch.
//! - [`ProcessProbe`]: whether the client is running, for restart reporting.

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Apple event error for a refused automation permission.
const AUTOMATION_DENIED_CODE: &str = "-1743";

const PROBE_SCRIPT: &str = r#"tell application "Mail" to count accounts"#;

const ACCOUNTS_SCRIPT: &str = r#"set AppleScript's text item delimiters to ","
set out to ""
tell application "Mail"
	repeat with a in accounts
		set out to out & (id of a) & tab & (name of a) & tab & (full name of a) & tab & ((account type of a) as string) & tab & ((email addresses of a) as string) & linefeed
	end repeat
end tell
return out"#;

/// Outcome of an automation probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutomationAvailability {
    Available,

    /// The user refused the automation permission.
    Denied { message: String },

    /// No scripting host, or the client is not installed.
    Unavailable { message: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AutomationError {
    #[error("automation denied: {message}")]
    Denied { message: String },

    #[error("automation failed: {message}")]
    Failed { message: String },
}

/// An account as reported by the client's scripting interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationAccount {
    pub id: String,
    pub name: String,
    pub full_name: String,
    pub account_type: String,
    pub emails: Vec<String>,
}

#[async_trait]
pub trait AutomationBridge: Send + Sync {
    /// Check whether automation can be used at all.
    async fn probe(&self) -> AutomationAvailability;

    /// Enumerate the client's accounts.
    async fn accounts(&self) -> Result<Vec<AutomationAccount>, AutomationError>;
}

#[async_trait]
pub trait ProcessProbe: Send + Sync {
    /// Whether the mail client process is running.
    async fn is_running(&self) -> bool;
}

/// Bridge that runs AppleScript through `osascript`.
#[derive(Debug, Clone, Default)]
pub struct OsascriptBridge;

impl OsascriptBridge {
    async fn run(script: &str) -> Result<String, AutomationError> {
        let output = Command::new("osascript")
            .arg("-e")
            .arg(script)
            .output()
            .await
            .map_err(|e| AutomationError::Failed {
                message: format!("failed to run osascript: {}", e),
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains(AUTOMATION_DENIED_CODE) {
            Err(AutomationError::Denied { message: stderr })
        } else {
            Err(AutomationError::Failed { message: stderr })
        }
    }
}

#[async_trait]
impl AutomationBridge for OsascriptBridge {
    async fn probe(&self) -> AutomationAvailability {
        if !cfg!(target_os = "macos") {
            return AutomationAvailability::Unavailable {
                message: "automation requires macOS".to_string(),
            };
        }

        match Self::run(PROBE_SCRIPT).await {
            Ok(_) => AutomationAvailability::Available,
            Err(AutomationError::Denied { message }) => AutomationAvailability::Denied { message },
            Err(AutomationError::Failed { message }) => {
                AutomationAvailability::Unavailable { message }
            }
        }
    }

    async fn accounts(&self) -> Result<Vec<AutomationAccount>, AutomationError> {
        let stdout = Self::run(ACCOUNTS_SCRIPT).await?;
        Ok(parse_account_lines(&stdout))
    }
}

/// Parse the tab-separated output of the accounts script.
pub fn parse_account_lines(output: &str) -> Vec<AutomationAccount> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(5, '\t');
            let id = fields.next()?.trim();
            let name = fields.next()?.trim();
            let full_name = fields.next()?.trim();
            let account_type = fields.next()?.trim();
            let emails = fields.next()?;

            if id.is_empty() {
                return None;
            }

            Some(AutomationAccount {
                id: id.to_string(),
                name: name.to_string(),
                full_name: full_name.to_string(),
                account_type: account_type.to_string(),
                emails: emails
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect(),
            })
        })
        .collect()
}

/// Probe that asks `pgrep` for an exact process name.
#[derive(Debug, Clone)]
pub struct PgrepProbe {
    process_name: String,
}

impl PgrepProbe {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
        }
    }
}

impl Default for PgrepProbe {
    fn default() -> Self {
        Self::new("Mail")
    }
}

#[async_trait]
impl ProcessProbe for PgrepProbe {
    async fn is_running(&self) -> bool {
        match Command::new("pgrep")
            .arg("-x")
            .arg(&self.process_name)
            .output()
            .await
        {
            Ok(output) => output.status.success(),
            Err(e) => {
                tracing::debug!("pgrep unavailable, assuming {} is not running: {}", self.process_name, e);
                false
            }
        }
    }
}
