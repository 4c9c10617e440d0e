//! Error types for Signet.
//!
//! [`SyncError`] is the taxonomy every per-binding failure is reported in.
//! Module-level errors ([`StoreError`], [`VaultError`], [`LedgerError`])
//! roll up into [`SignetError`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::coordinator::DispatchError;
use crate::ledger::LedgerError;
use crate::model::{BindingError, StoreKind};
use crate::policy::PolicyFinding;
use crate::store::StoreError;
use crate::vault::VaultError;

/// Which permission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessScope {
    /// Scripting the mail client was refused.
    Automation,

    /// Reading or writing the mail client's files was refused.
    Filesystem,
}

impl fmt::Display for AccessScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automation => f.write_str("automation"),
            Self::Filesystem => f.write_str("filesystem"),
        }
    }
}

/// Evidence collected when a store diverged from the ledger baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDetail {
    /// Baseline hash recorded by the last successful sync.
    pub expected_hash: String,

    /// Hash of the live content, `None` when the content is gone.
    pub found_hash: Option<String>,

    /// Modification time reported by the store, when it has one.
    pub modified_at: Option<DateTime<Utc>>,

    /// When the baseline was recorded.
    pub baseline_synced_at: DateTime<Utc>,
}

impl fmt::Display for ConflictDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.found_hash {
            Some(found) => write!(
                f,
                "content changed since last sync at {} (expected {}, found {})",
                self.baseline_synced_at.to_rfc3339(),
                short(&self.expected_hash),
                short(found)
            )?,
            None => write!(
                f,
                "content removed since last sync at {}",
                self.baseline_synced_at.to_rfc3339()
            )?,
        }
        if let Some(modified) = self.modified_at {
            write!(f, ", modified {}", modified.to_rfc3339())?;
        }
        Ok(())
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Failure of one binding's unit of work.
///
/// Every variant names the account it happened on. [`remediation`](Self::remediation)
/// gives the user-facing next step.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Automation or filesystem permission refused. Never retried.
    #[error("{account}: {scope} access denied: {message}")]
    AccessDenied {
        account: String,
        scope: AccessScope,
        message: String,
    },

    /// The target store has no accounts or identities yet.
    #[error("{account}: {store} store is not configured: {message}")]
    NotConfigured {
        account: String,
        store: StoreKind,
        message: String,
    },

    /// Live content diverged from the recorded baseline.
    #[error("{account}: conflict: {detail}")]
    Conflict {
        account: String,
        detail: ConflictDetail,
    },

    /// Hard content-policy findings refused the dispatch.
    #[error("{account}: blocked by content policy: {}", summarize(.findings))]
    ValidationBlocked {
        account: String,
        findings: Vec<PolicyFinding>,
    },

    /// Network or rate-limit failure that outlived its retry budget.
    #[error("{account}: gave up after {attempts} attempt(s): {message}")]
    Transient {
        account: String,
        attempts: u32,
        message: String,
    },

    /// Authorization still rejected after one refresh and one retry.
    #[error("{account}: authorization expired: {message}")]
    AuthExpired { account: String, message: String },

    /// Not-found, forbidden, or write failure.
    #[error("{account}: {message}")]
    Fatal { account: String, message: String },
}

fn summarize(findings: &[PolicyFinding]) -> String {
    findings
        .iter()
        .map(|f| f.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl SyncError {
    /// Build a fatal error.
    pub fn fatal(account: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            account: account.into(),
            message: message.into(),
        }
    }

    /// The account the failure happened on.
    pub fn account(&self) -> &str {
        match self {
            Self::AccessDenied { account, .. }
            | Self::NotConfigured { account, .. }
            | Self::Conflict { account, .. }
            | Self::ValidationBlocked { account, .. }
            | Self::Transient { account, .. }
            | Self::AuthExpired { account, .. }
            | Self::Fatal { account, .. } => account,
        }
    }

    /// Whether this failure is a conflict awaiting a human decision.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// What the user should do about it.
    pub fn remediation(&self) -> String {
        match self {
            Self::AccessDenied {
                scope: AccessScope::Automation,
                ..
            } => "Allow this app to control Mail in System Settings > Privacy & Security > Automation, then retry.".to_string(),
            Self::AccessDenied {
                scope: AccessScope::Filesystem,
                ..
            } => "Grant Full Disk Access in System Settings > Privacy & Security > Full Disk Access, then retry.".to_string(),
            Self::NotConfigured {
                store: StoreKind::Native,
                ..
            } => "Add an account and create at least one signature in Mail, then retry.".to_string(),
            Self::NotConfigured {
                store: StoreKind::Remote,
                ..
            } => "Sign in with `signet login <email>` before syncing this account.".to_string(),
            Self::Conflict { .. } => {
                "Review the store's current signature; re-run with --force to overwrite it.".to_string()
            }
            Self::ValidationBlocked { .. } => {
                "Fix the blocking findings, or re-run with --strip-images when embedded images are the cause.".to_string()
            }
            Self::Transient { .. } => "The service is busy or unreachable; try again later.".to_string(),
            Self::AuthExpired { account, .. } => {
                format!("Sign in again with `signet login {}`.", account)
            }
            Self::Fatal { .. } => "Check the account still exists and has permission for this change.".to_string(),
        }
    }
}

/// Top-level error type encompassing all Signet errors.
#[derive(Debug, Error)]
pub enum SignetError {
    /// Error from secret storage operations.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error from the credential vault.
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    /// Error from the sync ledger.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Error from a binding's unit of work.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Invalid binding list.
    #[error("binding error: {0}")]
    Binding(#[from] BindingError),

    /// A dispatch was refused before any unit ran.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}
