//! Remote (webmail) store adapter.
//!
//! Talks to the provider's send-as settings API. Every identity of an
//! account, primary or alias, carries its own signature; all of them are
//! reached with the primary address's OAuth credential.
//!
//! # Endpoints
//!
//! ```text
//! GET   {base}/gmail/v1/users/me/settings/sendAs
//! GET   {base}/gmail/v1/users/me/settings/sendAs/{email}
//! PATCH {base}/gmail/v1/users/me/settings/sendAs/{email}   {"signature": "<html>"}
//! ```

pub mod api;
pub mod retry;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, Response, StatusCode};
use std::borrow::Cow;
use std::sync::Arc;
use url::Url;

use crate::destination::{detect_conflict, CommitRequest, SignatureDestination, StoreState, WriteReceipt};
use crate::digest::content_hash;
use crate::error::SyncError;
use crate::ledger::Baseline;
use crate::model::{AccountBinding, CanonicalSignature, RemoteIdentity, StoreKind};
use crate::policy::{contains_embedded_images, strip_embedded_images, EmbeddedImagePolicy, PolicyFinding, Severity};
use crate::store::Secret;
use crate::vault::{TokenSource, VaultError};

pub use api::{SendAs, SendAsList};
pub use retry::RetryPolicy;

/// Production API root.
pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com";

/// A remote identity's live signature.
pub type RemoteState = StoreState;

/// Adapter for the provider's send-as signatures.
pub struct RemoteStore {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenSource>,
    retry: RetryPolicy,
}

impl RemoteStore {
    /// Create an adapter rooted at `base_url`, authenticating through `tokens`.
    pub fn new(base_url: Url, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            tokens,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn send_as_url(&self, account: &str, identity: Option<&str>) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SyncError::fatal(account, format!("invalid API base URL {}", self.base_url)))?;
            segments
                .pop_if_empty()
                .extend(["gmail", "v1", "users", "me", "settings", "sendAs"]);
            if let Some(identity) = identity {
                segments.push(identity);
            }
        }
        Ok(url)
    }

    /// Every send-as identity of the account. The primary lists the others
    /// as its aliases.
    pub async fn list_identities(&self, account: &str) -> Result<Vec<RemoteIdentity>, SyncError> {
        let url = self.send_as_url(account, None)?;
        let response = self.send_authorized(account, Method::GET, url, None).await?;
        let list: SendAsList = response.json().await.map_err(|e| {
            SyncError::fatal(account, format!("unexpected identity list response: {}", e))
        })?;

        if list.send_as.is_empty() {
            return Err(SyncError::NotConfigured {
                account: account.to_string(),
                store: StoreKind::Remote,
                message: "the account has no send-as identities".to_string(),
            });
        }

        let aliases: Vec<String> = list
            .send_as
            .iter()
            .filter(|s| !s.is_primary)
            .map(|s| s.send_as_email.clone())
            .collect();

        let now = Utc::now();
        let identities = list
            .send_as
            .into_iter()
            .map(|s| RemoteIdentity {
                aliases: if s.is_primary { aliases.clone() } else { Vec::new() },
                email: s.send_as_email,
                display_name: s.display_name,
                is_primary: s.is_primary,
                discovered_at: now,
            })
            .collect::<Vec<_>>();

        tracing::debug!(account, count = identities.len(), "Listed remote identities");
        Ok(identities)
    }

    /// The identity's current signature and its hash.
    pub async fn read_signature_state(
        &self,
        account: &str,
        identity: &str,
    ) -> Result<RemoteState, SyncError> {
        let url = self.send_as_url(account, Some(identity))?;
        let response = self.send_authorized(account, Method::GET, url, None).await?;
        let send_as: SendAs = response.json().await.map_err(|e| {
            SyncError::fatal(account, format!("unexpected response for {}: {}", identity, e))
        })?;

        tracing::debug!(account, identity, "Read remote signature");

        Ok(StoreState {
            hash: content_hash(&send_as.signature),
            content: send_as.signature,
            modified_at: None,
        })
    }

    /// Write a signature to one identity.
    ///
    /// Embedded images are handled before any request is made. Unless
    /// `force` is set, the live signature must still match `baseline`.
    pub async fn write_signature(
        &self,
        signature: &CanonicalSignature,
        account: &str,
        identity: &str,
        baseline: Option<&Baseline>,
        force: bool,
        images: EmbeddedImagePolicy,
    ) -> Result<WriteReceipt, SyncError> {
        let (html, warnings) = prepare_html(account, &signature.html, images)?;

        if !force && baseline.is_some() {
            let live = self.read_signature_state(account, identity).await?;
            detect_conflict(account, baseline, Some(&live))?;
        }

        self.patch_signature(account, identity, &html, warnings).await
    }

    async fn patch_signature(
        &self,
        account: &str,
        identity: &str,
        html: &str,
        warnings: Vec<String>,
    ) -> Result<WriteReceipt, SyncError> {
        let url = self.send_as_url(account, Some(identity))?;
        let body = serde_json::to_value(api::SignaturePatch { signature: html })
            .map_err(|e| SyncError::fatal(account, format!("failed to encode request: {}", e)))?;

        let response = self
            .send_authorized(account, Method::PATCH, url, Some(&body))
            .await?;

        // The server may normalize the HTML; its copy is the new baseline.
        let stored = match response.json::<api::PatchEcho>().await {
            Ok(api::PatchEcho {
                signature: Some(echoed),
            }) => echoed,
            _ => html.to_string(),
        };

        tracing::info!(account, identity, "Wrote remote signature");

        Ok(WriteReceipt {
            hash: content_hash(&stored),
            written_at: Utc::now(),
            restart_required: false,
            warnings,
        })
    }

    async fn access_token(&self, account: &str) -> Result<Secret, SyncError> {
        self.tokens
            .ensure_access_token(account)
            .await
            .map_err(|e| vault_error(account, e))
    }

    /// Send a request with the account's bearer token.
    ///
    /// A 401 gets one forced refresh and one retry. 429, 5xx and connection
    /// failures back off until the retry budget runs out. 403 and 404 fail
    /// at once.
    async fn send_authorized(
        &self,
        account: &str,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, SyncError> {
        let mut token = self.access_token(account).await?;
        let mut refreshed = false;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(token.expose());
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    self.back_off(account, attempt, &e.to_string()).await?;
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            match status {
                StatusCode::UNAUTHORIZED if !refreshed => {
                    tracing::info!(account, "Access token rejected, refreshing once");
                    refreshed = true;
                    token = self
                        .tokens
                        .force_refresh(account, &token)
                        .await
                        .map_err(|e| vault_error(account, e))?;
                }
                StatusCode::UNAUTHORIZED => {
                    return Err(SyncError::AuthExpired {
                        account: account.to_string(),
                        message: format!(
                            "still unauthorized after refreshing: {}",
                            error_message(response).await
                        ),
                    });
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    self.back_off(account, attempt, "rate limited").await?;
                }
                s if s.is_server_error() => {
                    self.back_off(account, attempt, &format!("server error {}", s)).await?;
                }
                StatusCode::FORBIDDEN => {
                    return Err(SyncError::fatal(
                        account,
                        format!(
                            "forbidden: {}; the grant may lack the settings scope",
                            error_message(response).await
                        ),
                    ));
                }
                StatusCode::NOT_FOUND => {
                    return Err(SyncError::fatal(
                        account,
                        format!(
                            "{} not found: {}; check it is a send-as identity of {}",
                            url.path_segments().and_then(|mut s| s.next_back()).unwrap_or("resource"),
                            error_message(response).await,
                            account
                        ),
                    ));
                }
                s => {
                    return Err(SyncError::fatal(
                        account,
                        format!("unexpected status {}: {}", s, error_message(response).await),
                    ));
                }
            }
        }
    }

    /// Sleep before the next attempt, or give up once the budget is spent.
    async fn back_off(&self, account: &str, attempt: u32, reason: &str) -> Result<(), SyncError> {
        if !self.retry.should_retry(attempt) {
            return Err(SyncError::Transient {
                account: account.to_string(),
                attempts: attempt,
                message: reason.to_string(),
            });
        }

        let delay = self.retry.delay_for(attempt);
        tracing::warn!(
            account,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Remote call failed ({}), retrying",
            reason
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

/// Apply the embedded image policy. Returns the HTML to send and any warnings.
fn prepare_html<'a>(
    account: &str,
    html: &'a str,
    images: EmbeddedImagePolicy,
) -> Result<(Cow<'a, str>, Vec<String>), SyncError> {
    if !contains_embedded_images(html) {
        return Ok((Cow::Borrowed(html), Vec::new()));
    }

    match images {
        EmbeddedImagePolicy::Reject => Err(SyncError::ValidationBlocked {
            account: account.to_string(),
            findings: vec![PolicyFinding::new(
                Severity::Hard,
                "embedded-image",
                "embedded data: images are discarded by the remote store; host them or strip them",
            )],
        }),
        EmbeddedImagePolicy::Strip => Ok((
            Cow::Owned(strip_embedded_images(html)),
            vec!["embedded images were removed from the remote copy".to_string()],
        )),
    }
}

fn vault_error(account: &str, err: VaultError) -> SyncError {
    match err {
        VaultError::NotFound { .. } => SyncError::NotConfigured {
            account: account.to_string(),
            store: StoreKind::Remote,
            message: "no credential stored for this account".to_string(),
        },
        VaultError::ReauthRequired { message, .. } => SyncError::AuthExpired {
            account: account.to_string(),
            message,
        },
        other => SyncError::fatal(account, other.to_string()),
    }
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    match response.json::<api::ErrorEnvelope>().await {
        Ok(envelope) if !envelope.error.message.is_empty() => envelope.error.message,
        _ => status
            .canonical_reason()
            .unwrap_or("no error message")
            .to_string(),
    }
}

#[async_trait]
impl SignatureDestination for RemoteStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Remote
    }

    async fn check_conflict(
        &self,
        _signature: &CanonicalSignature,
        binding: &AccountBinding,
        baseline: Option<&Baseline>,
    ) -> Result<Option<StoreState>, SyncError> {
        if baseline.is_none() {
            return Ok(None);
        }

        let live = self
            .read_signature_state(&binding.account, binding.target())
            .await?;
        detect_conflict(&binding.account, baseline, Some(&live))?;
        Ok(Some(live))
    }

    async fn commit(
        &self,
        signature: &CanonicalSignature,
        binding: &AccountBinding,
        request: &CommitRequest,
    ) -> Result<WriteReceipt, SyncError> {
        let (html, warnings) = prepare_html(&binding.account, &signature.html, request.embedded_images)?;
        self.patch_signature(&binding.account, binding.target(), &html, warnings)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoTokens;

    #[async_trait]
    impl TokenSource for NoTokens {
        async fn ensure_access_token(&self, email: &str) -> Result<Secret, VaultError> {
            Err(VaultError::NotFound {
                email: email.to_string(),
            })
        }

        async fn force_refresh(&self, email: &str, _stale: &Secret) -> Result<Secret, VaultError> {
            self.ensure_access_token(email).await
        }
    }

    #[test]
    fn test_send_as_url_escapes_identity() {
        let store = RemoteStore::new(Url::parse("http://127.0.0.1:9/").unwrap(), Arc::new(NoTokens));
        let url = store.send_as_url("user@x.com", Some("sales+eu@x.com")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9/gmail/v1/users/me/settings/sendAs/sales+eu@x.com"
        );

        let prefixed = RemoteStore::new(Url::parse("http://127.0.0.1:9/api/").unwrap(), Arc::new(NoTokens));
        let list = prefixed.send_as_url("user@x.com", None).unwrap();
        assert_eq!(list.path(), "/api/gmail/v1/users/me/settings/sendAs");
    }

    #[test]
    fn test_prepare_html() {
        let html = r#"<p>Hi</p><img src="data:image/gif;base64,R0lGOD=">"#;

        let err = prepare_html("user@x.com", html, EmbeddedImagePolicy::Reject).unwrap_err();
        assert!(matches!(err, SyncError::ValidationBlocked { .. }));

        let (stripped, warnings) = prepare_html("user@x.com", html, EmbeddedImagePolicy::Strip).unwrap();
        assert_eq!(stripped, "<p>Hi</p>");
        assert_eq!(warnings.len(), 1);

        let (clean, warnings) = prepare_html("user@x.com", "<p>Hi</p>", EmbeddedImagePolicy::Reject).unwrap();
        assert!(matches!(clean, Cow::Borrowed(_)));
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_missing_credential_is_not_configured() {
        let store = RemoteStore::new(Url::parse("http://127.0.0.1:9/").unwrap(), Arc::new(NoTokens));
        let err = store.list_identities("user@x.com").await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::NotConfigured {
                store: StoreKind::Remote,
                ..
            }
        ));
    }
}
