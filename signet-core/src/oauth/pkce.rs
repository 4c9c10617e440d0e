//! Authorization Code flow with PKCE (Proof Key for Code Exchange).
//!
//! Used by `signet login` to obtain an offline credential for a remote
//! identity.
//!
//! # Flow Overview
//!
//! 1. Generate PKCE code verifier and challenge
//! 2. Build authorization URL with state, challenge and `access_type=offline`
//! 3. User authorizes in browser
//! 4. Receive authorization code on the loopback redirect
//! 5. Exchange code for an [`OAuthCredential`]
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use signet_core::oauth::{pkce::PkceFlow, ClientCredentials};
//! use signet_core::provider::ProviderConfig;
//!
//! let flow = PkceFlow::new(
//!     ProviderConfig::google(),
//!     ClientCredentials::public("my-client-id"),
//!     8765,
//! );
//!
//! let (auth_url, csrf_state) = flow.build_authorization_url(Some("me@example.com"))?;
//! println!("Visit: {}", auth_url);
//!
//! let code = flow.listen_for_callback(&csrf_state).await?;
//! let credential = flow.exchange_code(code).await?;
//! # Ok(())
//! # }
//! ```

use oauth2::{
    reqwest::async_http_client, AuthorizationCode, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, Scope, TokenResponse,
};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::{create_oauth_client, credential_from_response, ClientCredentials, OAuthError};
use crate::provider::ProviderConfig;
use crate::vault::OAuthCredential;

const SUCCESS_PAGE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
    <html><body><h1>Signed in</h1>\
    <p>You can close this window and return to the terminal.</p></body></html>";

const FAILURE_PAGE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
    <html><body><h1>Sign-in failed</h1>\
    <p>Return to the terminal for details.</p></body></html>";

const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

/// PKCE flow for one sign-in attempt.
pub struct PkceFlow {
    config: ProviderConfig,
    client: ClientCredentials,
    port: u16,
    verifier: Mutex<Option<PkceCodeVerifier>>,
}

impl PkceFlow {
    /// Create a flow redirecting to `http://127.0.0.1:<port>/callback`.
    pub fn new(config: ProviderConfig, client: ClientCredentials, port: u16) -> Self {
        Self {
            config,
            client,
            port,
            verifier: Mutex::new(None),
        }
    }

    /// The loopback redirect URI registered for this flow.
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/callback", self.port)
    }

    /// Build the URL the user should visit.
    ///
    /// Returns the URL and the CSRF state to verify on the redirect. Offline
    /// access and a consent prompt are always requested so the provider issues
    /// a refresh token.
    pub fn build_authorization_url(
        &self,
        login_hint: Option<&str>,
    ) -> Result<(String, String), OAuthError> {
        let client = create_oauth_client(&self.config, &self.client, Some(&self.redirect_uri()))?;

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        *self.verifier.lock() = Some(pkce_verifier);

        let mut auth_request = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge)
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent");

        for scope in &self.config.scopes {
            auth_request = auth_request.add_scope(Scope::new(scope.clone()));
        }

        if let Some(hint) = login_hint {
            auth_request = auth_request.add_extra_param("login_hint", hint.to_string());
        }

        let (url, csrf_state) = auth_request.url();
        Ok((url.to_string(), csrf_state.secret().to_string()))
    }

    /// Exchange an authorization code for a credential.
    ///
    /// Fails with [`OAuthError::MissingRefreshToken`] when the provider grants
    /// online access only.
    pub async fn exchange_code(
        &self,
        code: impl Into<String>,
    ) -> Result<OAuthCredential, OAuthError> {
        let verifier = self.verifier.lock().take().ok_or_else(|| OAuthError::Exchange {
            message: "no PKCE verifier; build the authorization URL first".to_string(),
        })?;

        let client = create_oauth_client(&self.config, &self.client, Some(&self.redirect_uri()))?;

        let response = client
            .exchange_code(AuthorizationCode::new(code.into()))
            .set_pkce_verifier(verifier)
            .request_async(async_http_client)
            .await
            .map_err(|e| OAuthError::Exchange {
                message: e.to_string(),
            })?;

        if response.refresh_token().is_none() {
            return Err(OAuthError::MissingRefreshToken);
        }

        Ok(credential_from_response(&response, None))
    }

    /// Wait on the loopback port for the provider's redirect and return the code.
    pub async fn listen_for_callback(&self, expected_state: &str) -> Result<String, OAuthError> {
        let addr = format!("127.0.0.1:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| OAuthError::Callback {
                message: format!("failed to bind to {}: {}", addr, e),
            })?;

        tracing::info!("Listening for OAuth callback on {}", addr);

        loop {
            let (mut socket, _) = listener.accept().await.map_err(|e| OAuthError::Callback {
                message: format!("failed to accept connection: {}", e),
            })?;

            let mut buffer = [0; 4096];
            let n = socket.read(&mut buffer).await.map_err(|e| OAuthError::Callback {
                message: format!("failed to read request: {}", e),
            })?;

            let request = String::from_utf8_lossy(&buffer[..n]);
            let request_line = request.lines().next().unwrap_or_default();

            match parse_callback(request_line, expected_state) {
                Ok(Some(code)) => {
                    let _ = socket.write_all(SUCCESS_PAGE).await;
                    return Ok(code);
                }
                Ok(None) => {
                    // favicon and other stray requests
                    let _ = socket.write_all(BAD_REQUEST).await;
                }
                Err(e) => {
                    let _ = socket.write_all(FAILURE_PAGE).await;
                    return Err(e);
                }
            }
        }
    }
}

/// Extract the authorization code from an HTTP request line.
///
/// `Ok(None)` means the request was not the OAuth redirect.
fn parse_callback(request_line: &str, expected_state: &str) -> Result<Option<String>, OAuthError> {
    let Some(target) = request_line.split_whitespace().nth(1) else {
        return Ok(None);
    };
    let Some((_, query)) = target.split_once('?') else {
        return Ok(None);
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(err) = error {
        return Err(OAuthError::Callback {
            message: format!("provider returned error: {}", err),
        });
    }

    match (code, state) {
        (Some(_), Some(s)) if s != expected_state => Err(OAuthError::StateMismatch),
        (Some(_), None) => Err(OAuthError::StateMismatch),
        (Some(c), Some(_)) => Ok(Some(c)),
        (None, _) => Ok(None),
    }
}
