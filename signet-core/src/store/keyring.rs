//! OS keyring-backed secret storage implementation.

use async_trait::async_trait;
use keyring::Entry;

use super::{Secret, SecretStore, StoreError};

/// OS keyring-backed secret store.
///
/// Uses the platform's native keyring service (Keychain on macOS, Secret
/// Service on Linux, Credential Manager on Windows). Each key becomes the
/// user field of an entry under the store's service name.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this platform.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        Entry::new(service_name, "availability_check").map_err(|e| {
            StoreError::KeyringUnavailable {
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            service_name: service_name.to_string(),
        })
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Entry::new(&self.service_name, key).map_err(|e| StoreError::BackendError {
            message: format!("failed to open keyring entry {}: {}", key, e),
        })
    }
}

fn map_keyring_error(key: &str, err: keyring::Error) -> StoreError {
    match err {
        keyring::Error::NoStorageAccess(_) => StoreError::AccessDenied {
            key: key.to_string(),
        },
        keyring::Error::PlatformFailure(e) => StoreError::BackendError {
            message: format!("platform keyring failure for {}: {}", key, e),
        },
        other => StoreError::BackendError {
            message: format!("keyring error for {}: {}", key, other),
        },
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(Secret::new(value))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_keyring_error(key, e)),
        }
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(secret.expose())
            .map_err(|e| map_keyring_error(key, e))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(map_keyring_error(key, e)),
        }
    }
}
