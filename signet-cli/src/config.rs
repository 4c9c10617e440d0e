//! CLI configuration handling.

use anyhow::{bail, Context, Result};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use signet_core::{
    native::NativeLayout,
    oauth::ClientCredentials,
    provider::ProviderConfig,
    remote::DEFAULT_API_BASE,
    RetryPolicy,
};
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignetConfig {
    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,

    /// The mail client's data root, e.g. `~/Library/Mail`.
    pub mail_root: PathBuf,

    /// Pin a `V<n>` data directory instead of picking the highest one.
    pub mail_version: Option<u32>,

    /// Base URL of the send-as settings API.
    pub api_base_url: String,

    pub oauth: OAuthSettings,

    pub retry: RetryPolicy,

    /// Where the sync ledger lives. Defaults to the platform data dir.
    pub ledger_path: Option<PathBuf>,

    /// Store credentials in the OS keyring.
    pub use_keyring: bool,

    /// Logging level.
    pub log_level: String,
}

/// OAuth client registration for the remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: Option<String>,

    /// Loopback port for the sign-in redirect.
    pub redirect_port: u16,

    /// Override the provider's endpoints.
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            redirect_port: 8765,
            auth_url: None,
            token_url: None,
        }
    }
}

impl Default for SignetConfig {
    fn default() -> Self {
        let mail_root = BaseDirs::new()
            .map(|d| d.home_dir().join("Library").join("Mail"))
            .unwrap_or_else(|| PathBuf::from("Library/Mail"));

        Self {
            config_path: PathBuf::new(),
            mail_root,
            mail_version: None,
            api_base_url: DEFAULT_API_BASE.to_string(),
            oauth: OAuthSettings::default(),
            retry: RetryPolicy::default(),
            ledger_path: None,
            use_keyring: true,
            log_level: "info".to_string(),
        }
    }
}

impl SignetConfig {
    /// Where the ledger is read from and saved to.
    pub fn ledger_path(&self) -> Result<PathBuf> {
        match &self.ledger_path {
            Some(path) => Ok(path.clone()),
            None => signet_core::SyncLedger::default_path().context("No data directory for the ledger"),
        }
    }

    pub fn api_base_url(&self) -> Result<Url> {
        Url::parse(&self.api_base_url)
            .with_context(|| format!("Invalid api_base_url {:?}", self.api_base_url))
    }

    /// The provider, with any endpoint overrides applied.
    pub fn provider(&self) -> ProviderConfig {
        let mut provider = ProviderConfig::google();
        if let Some(url) = &self.oauth.auth_url {
            provider = provider.with_auth_url(url.clone());
        }
        if let Some(url) = &self.oauth.token_url {
            provider = provider.with_token_url(url.clone());
        }
        provider
    }

    /// Whether an OAuth client is registered.
    pub fn has_oauth_client(&self) -> bool {
        !self.oauth.client_id.trim().is_empty()
    }

    pub fn client_credentials(&self) -> Result<ClientCredentials> {
        if !self.has_oauth_client() {
            bail!(
                "No OAuth client configured; set oauth.client_id in {}",
                self.config_path.display()
            );
        }

        let mut client = ClientCredentials::public(self.oauth.client_id.trim());
        if let Some(secret) = &self.oauth.client_secret {
            client = client.with_secret(secret.clone());
        }
        Ok(client)
    }

    /// The native data directory to use.
    pub fn native_layout(&self) -> Result<NativeLayout> {
        if let Some(version) = self.mail_version {
            return Ok(NativeLayout::new(&self.mail_root, version));
        }

        NativeLayout::detect(&self.mail_root)
            .with_context(|| format!("Failed to read mail root {:?}", self.mail_root))?
            .with_context(|| format!("No V<n> data directory under {:?}", self.mail_root))
    }
}

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("signet.toml"))
}

/// Load configuration from `path`, or the default location, or defaults.
pub fn load_config(path: Option<&Path>) -> Result<SignetConfig> {
    match path {
        Some(path) => load_config_from(path, true),
        None => load_config_from(&default_config_path(), false),
    }
}

/// Load configuration from `config_path`. A missing file yields defaults
/// unless `required` is set.
pub fn load_config_from(config_path: &Path, required: bool) -> Result<SignetConfig> {
    let mut config = if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else if required {
        bail!("Config file {:?} does not exist", config_path);
    } else {
        SignetConfig::default()
    };

    let retry = config.retry.bounded();
    if retry != config.retry {
        tracing::warn!(
            "Retry settings {:?} are out of range; using {:?}",
            config.retry,
            retry
        );
        config.retry = retry;
    }

    config.config_path = config_path.to_path_buf();
    Ok(config)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "raibid-labs", "signet")
}
