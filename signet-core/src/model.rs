//! Domain model types for Signet.
//!
//! This module defines the records the synchronization engine works with:
//! - [`CanonicalSignature`] - The user-authored signature, owned by the caller
//! - [`AccountBinding`] - Association of a signature with one destination
//! - [`BindingKey`] - Identity key of a binding, also the ledger key
//! - [`NativeAccount`] - An account discovered in the native mail client
//! - [`RemoteIdentity`] - A send-as identity of the webmail provider

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::digest::content_hash;

/// The kind of store a binding targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// The native mail client's signature files and indices.
    Native,

    /// The webmail provider's per-identity signature field.
    Remote,
}

impl StoreKind {
    /// Get the store kind as a string for keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identifier of a canonical signature.
///
/// The identifier doubles as the native store's signature id, so it is kept
/// verbatim (native ids are uppercase UUIDs).
///
/// # Examples
///
/// ```
/// use signet_core::SignatureId;
///
/// let id = SignatureId::new("6C1D1E2A-0B8F-4B8E-9A43-2F1E0D7C9B11");
/// assert_eq!(id.as_str(), "6C1D1E2A-0B8F-4B8E-9A43-2F1E0D7C9B11");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureId(String);

impl SignatureId {
    /// Create a new signature ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the signature ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SignatureId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SignatureId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Identity key of a binding: `(store kind, account, alias or empty)`.
///
/// Renders as `kind/account/alias`, e.g. `native/acc-1/` or
/// `remote/user@x.com/sales@x.com`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingKey {
    pub store: StoreKind,
    pub account: String,
    #[serde(default)]
    pub alias: String,
}

impl BindingKey {
    /// Create a binding key.
    pub fn new(store: StoreKind, account: impl Into<String>, alias: Option<&str>) -> Self {
        Self {
            store,
            account: account.into(),
            alias: alias.unwrap_or_default().to_string(),
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.store, self.account, self.alias)
    }
}

/// Association between a canonical signature and one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBinding {
    /// Which store the binding targets.
    pub store: StoreKind,

    /// Native account id, or the primary email of the remote account.
    pub account: String,

    /// Remote alias address; `None` targets the account itself.
    #[serde(default)]
    pub alias: Option<String>,

    /// Whether the signature should be the account's default.
    #[serde(default)]
    pub is_default: bool,

    /// When this binding was last synchronized successfully.
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl AccountBinding {
    /// Bind to a native mail client account.
    pub fn native(account_id: impl Into<String>) -> Self {
        Self {
            store: StoreKind::Native,
            account: account_id.into(),
            alias: None,
            is_default: false,
            last_synced_at: None,
        }
    }

    /// Bind to a remote account's primary identity.
    pub fn remote(account_email: impl Into<String>) -> Self {
        Self {
            store: StoreKind::Remote,
            account: account_email.into(),
            alias: None,
            is_default: false,
            last_synced_at: None,
        }
    }

    /// Target an alias identity of the account.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Mark the binding as the account's default signature.
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// The identity key of this binding.
    pub fn key(&self) -> BindingKey {
        BindingKey::new(self.store, self.account.clone(), self.alias.as_deref())
    }

    /// The address or account the write lands on.
    pub fn target(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.account)
    }
}

/// A binding list violated one of its invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    /// The same identity key appears twice.
    #[error("binding {key} appears more than once")]
    Duplicate { key: String },

    /// More than one default for the same store account.
    #[error("more than one default binding for {store} account {account}")]
    MultipleDefaults { store: StoreKind, account: String },
}

/// The user-authored signature, the canonical copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalSignature {
    pub id: SignatureId,

    /// Display name, used as the native store's signature name.
    pub name: String,

    /// HTML body of the signature.
    pub html: String,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    /// Destinations, in the order the caller declared them.
    #[serde(default)]
    pub bindings: Vec<AccountBinding>,
}

impl CanonicalSignature {
    /// Create a signature with no bindings and the current timestamp.
    pub fn new(id: impl Into<SignatureId>, name: impl Into<String>, html: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            html: html.into(),
            created_at: now,
            updated_at: now,
            bindings: Vec::new(),
        }
    }

    /// Add a binding.
    pub fn with_binding(mut self, binding: AccountBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Hash of the HTML body.
    pub fn content_hash(&self) -> String {
        content_hash(&self.html)
    }

    /// Check that identity keys are unique and that each store account has
    /// at most one default binding.
    pub fn validate_bindings(&self) -> Result<(), BindingError> {
        let mut keys = HashSet::new();
        let mut defaults = HashSet::new();

        for binding in &self.bindings {
            let key = binding.key();
            if !keys.insert(key.clone()) {
                return Err(BindingError::Duplicate {
                    key: key.to_string(),
                });
            }
            if binding.is_default && !defaults.insert((binding.store, binding.account.clone())) {
                return Err(BindingError::MultipleDefaults {
                    store: binding.store,
                    account: binding.account.clone(),
                });
            }
        }

        Ok(())
    }
}

/// An account configured in the native mail client.
///
/// Discovery output only; the native store's ordering index stays the
/// source of truth for which signature an account uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeAccount {
    pub id: String,
    pub email: String,
    pub display_name: String,

    /// Whether the account is the client vendor's own cloud mail account.
    pub is_managed_cloud: bool,

    pub discovered_at: DateTime<Utc>,
}

/// A send-as identity of the remote account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIdentity {
    pub email: String,
    pub display_name: String,
    pub is_primary: bool,

    /// Other send-as addresses; only populated on the primary identity.
    pub aliases: Vec<String>,

    pub discovered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_key_display() {
        let native = AccountBinding::native("acc-1");
        assert_eq!(native.key().to_string(), "native/acc-1/");

        let alias = AccountBinding::remote("user@x.com").with_alias("sales@x.com");
        assert_eq!(alias.key().to_string(), "remote/user@x.com/sales@x.com");
        assert_eq!(alias.target(), "sales@x.com");
    }

    #[test]
    fn test_validate_bindings_accepts_distinct_aliases() {
        let signature = CanonicalSignature::new("S1", "Work", "<p>A</p>")
            .with_binding(AccountBinding::remote("user@x.com").as_default())
            .with_binding(AccountBinding::remote("user@x.com").with_alias("sales@x.com"))
            .with_binding(AccountBinding::native("acc-1").as_default());

        assert!(signature.validate_bindings().is_ok());
    }

    #[test]
    fn test_validate_bindings_rejects_duplicate_key() {
        let signature = CanonicalSignature::new("S1", "Work", "<p>A</p>")
            .with_binding(AccountBinding::native("acc-1"))
            .with_binding(AccountBinding::native("acc-1").as_default());

        assert!(matches!(
            signature.validate_bindings(),
            Err(BindingError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_validate_bindings_rejects_two_defaults() {
        let signature = CanonicalSignature::new("S1", "Work", "<p>A</p>")
            .with_binding(AccountBinding::remote("user@x.com").as_default())
            .with_binding(
                AccountBinding::remote("user@x.com")
                    .with_alias("sales@x.com")
                    .as_default(),
            );

        assert!(matches!(
            signature.validate_bindings(),
            Err(BindingError::MultipleDefaults { .. })
        ));
    }

    #[test]
    fn test_signature_json_defaults() {
        let json = r#"{
            "id": "S1",
            "name": "Work",
            "html": "<p>A</p>",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z",
            "bindings": [{ "store": "native", "account": "acc-1" }]
        }"#;

        let signature: CanonicalSignature = serde_json::from_str(json).unwrap();
        assert_eq!(signature.bindings.len(), 1);
        assert!(!signature.bindings[0].is_default);
        assert!(signature.bindings[0].last_synced_at.is_none());
    }
}
