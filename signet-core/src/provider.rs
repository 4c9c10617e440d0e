//! OAuth provider configuration for the remote store.
//!
//! The webmail provider's endpoints and the scope needed to read and write
//! send-as signatures. Custom endpoints (e.g. a mock server in tests) can be
//! built with the `with_*` helpers.

use serde::{Deserialize, Serialize};

/// Scope granting read/write access to send-as settings.
pub const GMAIL_SETTINGS_SCOPE: &str = "https://www.googleapis.com/auth/gmail.settings.basic";

/// Configuration for an OAuth provider.
///
/// # Example
///
/// ```
/// use signet_core::provider::ProviderConfig;
///
/// let google = ProviderConfig::google();
/// assert!(google.token_url.starts_with("https://oauth2.googleapis.com"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Unique identifier for the provider.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// OAuth authorization endpoint URL.
    pub auth_url: String,

    /// OAuth token endpoint URL.
    pub token_url: String,

    /// Optional token revocation endpoint URL.
    pub revoke_url: Option<String>,

    /// Scopes requested during sign-in.
    pub scopes: Vec<String>,
}

impl ProviderConfig {
    /// Google, with the send-as settings scope and the user's email address.
    pub fn google() -> Self {
        Self {
            id: "google".to_string(),
            name: "Google".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            revoke_url: Some("https://oauth2.googleapis.com/revoke".to_string()),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                GMAIL_SETTINGS_SCOPE.to_string(),
            ],
        }
    }

    /// Set the authorization URL.
    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = url.into();
        self
    }

    /// Set the token URL.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Set the requested scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::google()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_google_requests_settings_scope() {
        let google = ProviderConfig::google();
        assert!(google.scopes.iter().any(|s| s == GMAIL_SETTINGS_SCOPE));
        assert_eq!(google, ProviderConfig::default());
    }

    #[test]
    fn test_builder_overrides_endpoints() {
        let config = ProviderConfig::google()
            .with_token_url("http://127.0.0.1:9/token")
            .with_scopes(vec!["read".to_string()]);

        assert_eq!(config.token_url, "http://127.0.0.1:9/token");
        assert_eq!(config.scopes, vec!["read"]);
        assert_eq!(config.id, "google");
    }
}
