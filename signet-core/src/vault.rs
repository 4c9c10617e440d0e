//! Credential vault for the remote store's OAuth credentials.
//!
//! [`CredentialVault`] keeps one [`OAuthCredential`] per identity email in a
//! [`SecretStore`], refreshes it through a [`TokenRefresher`] before it gets
//! within [`REFRESH_HORIZON_MINUTES`] of expiry, and clears it entirely when a
//! refresh fails so the user is sent back through sign-in instead of looping
//! on a dead refresh token.
//!
//! Refreshes for the same identity never overlap: a successful refresh
//! invalidates the previous refresh token at the provider, so a second,
//! concurrent refresh would fail and wipe a perfectly good credential.
//!
//! # Example
//!
//! ```rust,ignore
//! use signet_core::{CredentialVault, MemoryStore};
//!
//! let vault = CredentialVault::new(MemoryStore::new(), refresher);
//! let token = vault.ensure_access_token("user@x.com").await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::store::{Secret, SecretStore, StoreError};

/// Credentials expiring within this many minutes are refreshed before use.
pub const REFRESH_HORIZON_MINUTES: i64 = 5;

/// What a stored secret is for; the first half of its storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialPurpose {
    AccessToken,
    RefreshToken,
    TokenExpiry,
}

impl CredentialPurpose {
    const ALL: [CredentialPurpose; 3] = [Self::AccessToken, Self::RefreshToken, Self::TokenExpiry];

    /// Get the purpose as a string for storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::TokenExpiry => "token_expiry",
        }
    }
}

/// Storage key for one purpose of one identity: `signet/{purpose}/{email}`.
pub fn credential_key(purpose: CredentialPurpose, email: &str) -> String {
    format!("signet/{}/{}", purpose.as_str(), email.trim().to_lowercase())
}

/// OAuth tokens for one remote identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCredential {
    pub access_token: Secret,
    pub refresh_token: Secret,
    pub expires_at: DateTime<Utc>,
}

impl OAuthCredential {
    /// Create a credential.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: Secret::new(refresh_token),
            expires_at,
        }
    }

    /// Whether the access token expires at or before `now + horizon`.
    pub fn expires_within(&self, horizon: Duration) -> bool {
        self.expires_at <= Utc::now() + horizon
    }
}

/// Error type for vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// No credential is stored for the identity.
    #[error("no credential stored for {email}")]
    NotFound { email: String },

    /// The refresh exchange failed; the credential has been cleared.
    #[error("credential for {email} was cleared after a failed refresh: {message}")]
    ReauthRequired { email: String, message: String },

    /// Some parts of the credential are missing or unreadable.
    #[error("stored credential for {email} is corrupt: {message}")]
    Corrupt { email: String, message: String },

    /// Storage error from the secret store.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Refresh-token exchange failed.
#[derive(Debug, Clone, Error)]
#[error("token refresh failed: {message}")]
pub struct RefreshError {
    pub message: String,
}

/// The external refresh-token exchange.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange `refresh_token` for a new credential.
    ///
    /// Providers that do not rotate refresh tokens should return the one
    /// they were given.
    async fn refresh(
        &self,
        email: &str,
        refresh_token: &Secret,
    ) -> Result<OAuthCredential, RefreshError>;
}

/// Source of bearer tokens for authenticated calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A token that is valid beyond the refresh horizon.
    async fn ensure_access_token(&self, email: &str) -> Result<Secret, VaultError>;

    /// Refresh after the server rejected `stale`.
    ///
    /// If another task already replaced `stale`, the replacement is returned
    /// without a second exchange.
    async fn force_refresh(&self, email: &str, stale: &Secret) -> Result<Secret, VaultError>;
}

/// Per-identity OAuth credential storage with single-flight refresh.
pub struct CredentialVault<S: SecretStore> {
    store: S,
    refresher: Arc<dyn TokenRefresher>,
    horizon: Duration,
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: SecretStore> CredentialVault<S> {
    /// Create a vault with the default 5-minute refresh horizon.
    pub fn new(store: S, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self::with_refresh_horizon(store, refresher, REFRESH_HORIZON_MINUTES)
    }

    /// Create a vault with a custom refresh horizon in minutes.
    pub fn with_refresh_horizon(
        store: S,
        refresher: Arc<dyn TokenRefresher>,
        horizon_minutes: i64,
    ) -> Self {
        Self {
            store,
            refresher,
            horizon: Duration::minutes(horizon_minutes),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying secret store.
    pub fn secret_store(&self) -> &S {
        &self.store
    }

    /// Persist a credential for `email`, replacing any previous one.
    pub async fn store(&self, email: &str, credential: &OAuthCredential) -> Result<(), VaultError> {
        let expiry = Secret::new(credential.expires_at.timestamp().to_string());

        self.store
            .set(&credential_key(CredentialPurpose::RefreshToken, email), &credential.refresh_token)
            .await?;
        self.store
            .set(&credential_key(CredentialPurpose::TokenExpiry, email), &expiry)
            .await?;
        self.store
            .set(&credential_key(CredentialPurpose::AccessToken, email), &credential.access_token)
            .await?;

        tracing::debug!("Stored credential for {}", email);
        Ok(())
    }

    /// Load the credential for `email`, `None` when nothing is stored.
    pub async fn load(&self, email: &str) -> Result<Option<OAuthCredential>, VaultError> {
        let access = self
            .store
            .get(&credential_key(CredentialPurpose::AccessToken, email))
            .await?;
        let Some(access_token) = access else {
            return Ok(None);
        };

        let refresh_token = self
            .store
            .get(&credential_key(CredentialPurpose::RefreshToken, email))
            .await?
            .ok_or_else(|| VaultError::Corrupt {
                email: email.to_string(),
                message: "refresh token missing".to_string(),
            })?;

        let expiry = self
            .store
            .get(&credential_key(CredentialPurpose::TokenExpiry, email))
            .await?
            .ok_or_else(|| VaultError::Corrupt {
                email: email.to_string(),
                message: "expiry missing".to_string(),
            })?;

        let expires_at = expiry
            .expose()
            .parse::<i64>()
            .ok()
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .ok_or_else(|| VaultError::Corrupt {
                email: email.to_string(),
                message: "expiry is not a unix timestamp".to_string(),
            })?;

        Ok(Some(OAuthCredential {
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    /// Remove every part of the credential for `email`.
    pub async fn clear(&self, email: &str) -> Result<(), VaultError> {
        let mut first_error = None;
        for purpose in CredentialPurpose::ALL {
            if let Err(e) = self.store.delete(&credential_key(purpose, email)).await {
                first_error.get_or_insert(e);
            }
        }

        tracing::info!("Cleared credential for {}", email);
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Whether a credential exists and does not expire within the horizon.
    pub async fn is_valid(&self, email: &str) -> Result<bool, VaultError> {
        Ok(self
            .load(email)
            .await?
            .is_some_and(|c| !c.expires_within(self.horizon)))
    }

    fn refresh_lock(&self, email: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_locks
            .lock()
            .entry(email.trim().to_lowercase())
            .or_default()
            .clone()
    }

    /// Exchange the refresh token. Caller holds the identity's refresh lock.
    async fn refresh_locked(
        &self,
        email: &str,
        current: OAuthCredential,
    ) -> Result<Secret, VaultError> {
        tracing::info!("Refreshing access token for {}", email);

        match self.refresher.refresh(email, &current.refresh_token).await {
            Ok(mut refreshed) => {
                if refreshed.refresh_token.is_empty() {
                    refreshed.refresh_token = current.refresh_token.clone();
                }
                self.store(email, &refreshed).await?;
                tracing::info!("Refreshed access token for {}", email);
                Ok(refreshed.access_token)
            }
            Err(e) => {
                tracing::error!("Refresh failed for {}, clearing credential: {}", email, e);
                self.clear(email).await?;
                Err(VaultError::ReauthRequired {
                    email: email.to_string(),
                    message: e.message,
                })
            }
        }
    }
}

#[async_trait]
impl<S: SecretStore + 'static> TokenSource for CredentialVault<S> {
    async fn ensure_access_token(&self, email: &str) -> Result<Secret, VaultError> {
        let lock = self.refresh_lock(email);
        let _guard = lock.lock().await;

        let credential = self.load(email).await?.ok_or_else(|| VaultError::NotFound {
            email: email.to_string(),
        })?;

        if !credential.expires_within(self.horizon) {
            tracing::debug!("Using cached access token for {}", email);
            return Ok(credential.access_token);
        }

        self.refresh_locked(email, credential).await
    }

    async fn force_refresh(&self, email: &str, stale: &Secret) -> Result<Secret, VaultError> {
        let lock = self.refresh_lock(email);
        let _guard = lock.lock().await;

        let credential = self.load(email).await?.ok_or_else(|| VaultError::NotFound {
            email: email.to_string(),
        })?;

        if credential.access_token != *stale && !credential.expires_within(self.horizon) {
            tracing::debug!("Access token for {} already replaced by another task", email);
            return Ok(credential.access_token);
        }

        self.refresh_locked(email, credential).await
    }
}
