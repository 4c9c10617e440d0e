//! Builds the engine's components from configuration.

use anyhow::{Context, Result};
use signet_core::{
    create_store,
    native::NativeStore,
    oauth::{ClientCredentials, OAuthRefresher},
    CredentialVault, RemoteStore, SecretStore, SyncCoordinator, SyncLedger,
};
use std::sync::Arc;

use crate::config::SignetConfig;

pub type Vault = CredentialVault<Box<dyn SecretStore>>;

/// The credential vault, refreshing through the configured OAuth client.
pub fn vault(config: &SignetConfig) -> Result<Arc<Vault>> {
    Ok(build_vault(config, config.client_credentials()?))
}

/// A vault used only to remove credentials, which works without an OAuth
/// client registration.
pub fn removal_vault(config: &SignetConfig) -> Arc<Vault> {
    build_vault(config, ClientCredentials::public(config.oauth.client_id.trim()))
}

fn build_vault(config: &SignetConfig, client: ClientCredentials) -> Arc<Vault> {
    let refresher = OAuthRefresher::new(config.provider(), client);
    Arc::new(CredentialVault::new(
        create_store(config.use_keyring),
        Arc::new(refresher),
    ))
}

pub fn native_store(config: &SignetConfig) -> Result<NativeStore> {
    Ok(NativeStore::new(config.native_layout()?))
}

pub fn remote_store(config: &SignetConfig, vault: Arc<Vault>) -> Result<RemoteStore> {
    Ok(RemoteStore::new(config.api_base_url()?, vault).with_retry(config.retry))
}

pub fn ledger(config: &SignetConfig) -> Result<Arc<SyncLedger>> {
    let path = config.ledger_path()?;
    let ledger = SyncLedger::load_from_path(&path)
        .with_context(|| format!("Failed to load ledger from {:?}", path))?;
    Ok(Arc::new(ledger))
}

/// A coordinator with every store the configuration allows.
///
/// A store that cannot be set up is left out; its bindings then fail as
/// not configured instead of failing the whole dispatch.
pub fn coordinator(config: &SignetConfig, ledger: Arc<SyncLedger>) -> Result<SyncCoordinator> {
    let mut coordinator = SyncCoordinator::new(ledger);

    match native_store(config) {
        Ok(native) => coordinator = coordinator.with_native(Arc::new(native)),
        Err(e) => tracing::warn!("Native store unavailable: {:#}", e),
    }

    if config.has_oauth_client() {
        let remote = remote_store(config, vault(config)?)?;
        coordinator = coordinator.with_remote(Arc::new(remote));
    } else {
        tracing::warn!("No OAuth client configured; remote bindings will be skipped");
    }

    Ok(coordinator)
}
