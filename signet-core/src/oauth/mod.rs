//! OAuth 2.0 flows for the remote store.
//!
//! - [`pkce`] - Authorization Code flow with PKCE and a loopback redirect
//! - [`OAuthRefresher`] - Refresh-token exchange used by the credential vault
//!
//! This module is only available when the `oauth` feature is enabled.

pub mod pkce;

use async_trait::async_trait;
use chrono::Utc;
use oauth2::{
    basic::{BasicClient, BasicTokenResponse},
    reqwest::async_http_client,
    AuthUrl, ClientId, ClientSecret, RedirectUrl, RefreshToken, TokenResponse, TokenUrl,
};
use thiserror::Error;

use crate::provider::ProviderConfig;
use crate::store::Secret;
use crate::vault::{OAuthCredential, RefreshError, TokenRefresher};

/// Lifetime assumed when the provider omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Error type for OAuth flows.
#[derive(Debug, Error)]
pub enum OAuthError {
    /// The provider or client configuration is invalid.
    #[error("invalid OAuth configuration: {message}")]
    Config { message: String },

    /// Exchanging the authorization code failed.
    #[error("token exchange failed: {message}")]
    Exchange { message: String },

    /// The loopback redirect could not be received.
    #[error("OAuth callback failed: {message}")]
    Callback { message: String },

    /// The redirect's state did not match the one we issued.
    #[error("state parameter mismatch")]
    StateMismatch,

    /// The provider granted no refresh token, so the credential cannot be kept.
    #[error("provider did not return a refresh token")]
    MissingRefreshToken,
}

/// OAuth client registration.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<Secret>,
}

impl ClientCredentials {
    /// A public client (PKCE, no secret).
    pub fn public(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
        }
    }

    /// A confidential client.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(Secret::new(secret));
        self
    }
}

/// Create an OAuth2 client from a provider configuration.
pub fn create_oauth_client(
    config: &ProviderConfig,
    client: &ClientCredentials,
    redirect_uri: Option<&str>,
) -> Result<BasicClient, OAuthError> {
    let auth_url = AuthUrl::new(config.auth_url.clone()).map_err(|e| OAuthError::Config {
        message: format!("invalid auth URL: {}", e),
    })?;

    let token_url = TokenUrl::new(config.token_url.clone()).map_err(|e| OAuthError::Config {
        message: format!("invalid token URL: {}", e),
    })?;

    let mut oauth_client = BasicClient::new(
        ClientId::new(client.client_id.clone()),
        client
            .client_secret
            .as_ref()
            .map(|s| ClientSecret::new(s.expose().to_string())),
        auth_url,
        Some(token_url),
    );

    if let Some(redirect) = redirect_uri {
        let redirect_url =
            RedirectUrl::new(redirect.to_string()).map_err(|e| OAuthError::Config {
                message: format!("invalid redirect URL: {}", e),
            })?;
        oauth_client = oauth_client.set_redirect_uri(redirect_url);
    }

    Ok(oauth_client)
}

/// Turn a token response into a credential.
///
/// `fallback_refresh` is used when the response carries no refresh token;
/// with neither, the refresh token is left empty.
pub(crate) fn credential_from_response(
    response: &BasicTokenResponse,
    fallback_refresh: Option<&Secret>,
) -> OAuthCredential {
    let lifetime = response
        .expires_in()
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));

    let refresh_token = response
        .refresh_token()
        .map(|t| Secret::new(t.secret().clone()))
        .or_else(|| fallback_refresh.cloned())
        .unwrap_or_else(|| Secret::new(""));

    OAuthCredential {
        access_token: Secret::new(response.access_token().secret().clone()),
        refresh_token,
        expires_at: Utc::now() + lifetime,
    }
}

/// [`TokenRefresher`] backed by the provider's token endpoint.
pub struct OAuthRefresher {
    config: ProviderConfig,
    client: ClientCredentials,
}

impl OAuthRefresher {
    /// Create a refresher for the given provider and client registration.
    pub fn new(config: ProviderConfig, client: ClientCredentials) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(
        &self,
        email: &str,
        refresh_token: &Secret,
    ) -> Result<OAuthCredential, RefreshError> {
        let client = create_oauth_client(&self.config, &self.client, None).map_err(|e| {
            RefreshError {
                message: e.to_string(),
            }
        })?;

        let response = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.expose().to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| RefreshError {
                message: format!("refresh for {} rejected: {}", email, e),
            })?;

        Ok(credential_from_response(&response, Some(refresh_token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_oauth_client() {
        let client = create_oauth_client(
            &ProviderConfig::google(),
            &ClientCredentials::public("client-id").with_secret("secret"),
            Some("http://127.0.0.1:8765/callback"),
        );
        assert!(client.is_ok());
    }

    #[test]
    fn test_create_oauth_client_invalid_urls() {
        let config = ProviderConfig::google().with_auth_url("not a valid url");
        let client = create_oauth_client(&config, &ClientCredentials::public("client-id"), None);
        assert!(matches!(client, Err(OAuthError::Config { .. })));
    }
}
