//! Integration tests for credential refresh.
//!
//! These tests verify that the CredentialVault, backed by the OAuth
//! refresher and a mock token endpoint:
//! - Serves cached tokens without touching the network
//! - Refreshes tokens inside the horizon and persists the result
//! - Runs one exchange for concurrent callers
//! - Clears the credential when the refresh token is rejected

#![cfg(feature = "oauth")]

use chrono::{Duration, Utc};
use std::sync::Arc;
use signet_core::{
    oauth::{ClientCredentials, OAuthRefresher},
    provider::ProviderConfig,
    store::MemoryStore,
    CredentialVault, OAuthCredential, Secret, TokenSource, VaultError,
};
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

const EMAIL: &str = "user@x.com";

/// Helper to set up a vault whose refresher talks to the mock server.
fn setup_vault(server: &MockServer) -> Arc<CredentialVault<MemoryStore>> {
    let config = ProviderConfig::google().with_token_url(format!("{}/token", server.uri()));
    let refresher = OAuthRefresher::new(config, ClientCredentials::public("test-client-id"));
    Arc::new(CredentialVault::new(MemoryStore::new(), Arc::new(refresher)))
}

fn credential(expires_in: Duration) -> OAuthCredential {
    OAuthCredential::new("old-access", "refresh-1", Utc::now() + expires_in)
}

async fn mount_token_endpoint(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "new-access",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_valid_token_is_served_from_storage() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 0).await;

    let vault = setup_vault(&server);
    vault.store(EMAIL, &credential(Duration::hours(1))).await.unwrap();

    let token = vault.ensure_access_token(EMAIL).await.unwrap();
    assert_eq!(token.expose(), "old-access");
    assert!(vault.is_valid(EMAIL).await.unwrap());
}

#[tokio::test]
async fn test_expiring_token_is_refreshed_and_persisted() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    let vault = setup_vault(&server);
    vault.store(EMAIL, &credential(Duration::minutes(2))).await.unwrap();

    let token = vault.ensure_access_token(EMAIL).await.unwrap();
    assert_eq!(token.expose(), "new-access");

    let stored = vault.load(EMAIL).await.unwrap().unwrap();
    assert_eq!(stored.access_token.expose(), "new-access");
    // The provider did not rotate it, so the old refresh token is kept.
    assert_eq!(stored.refresh_token.expose(), "refresh-1");
    assert!(stored.expires_at > Utc::now() + Duration::minutes(50));
}

#[tokio::test]
async fn test_concurrent_callers_share_one_exchange() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    let vault = setup_vault(&server);
    vault.store(EMAIL, &credential(-Duration::minutes(1))).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let vault = Arc::clone(&vault);
        tasks.push(tokio::spawn(async move { vault.ensure_access_token(EMAIL).await }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().expose(), "new-access");
    }
}

#[tokio::test]
async fn test_force_refresh_after_replacement_skips_exchange() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 1).await;

    let vault = setup_vault(&server);
    vault.store(EMAIL, &credential(Duration::hours(1))).await.unwrap();

    let stale = Secret::new("old-access");
    let first = vault.force_refresh(EMAIL, &stale).await.unwrap();
    let second = vault.force_refresh(EMAIL, &stale).await.unwrap();

    assert_eq!(first.expose(), "new-access");
    assert_eq!(second.expose(), "new-access");
}

#[tokio::test]
async fn test_rejected_refresh_clears_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let vault = setup_vault(&server);
    vault.store(EMAIL, &credential(Duration::zero())).await.unwrap();

    let err = vault.ensure_access_token(EMAIL).await.unwrap_err();
    assert!(matches!(err, VaultError::ReauthRequired { .. }), "{err:?}");
    assert!(vault.load(EMAIL).await.unwrap().is_none());

    let err = vault.ensure_access_token(EMAIL).await.unwrap_err();
    assert!(matches!(err, VaultError::NotFound { .. }), "{err:?}");
}

#[tokio::test]
async fn test_identities_are_isolated() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, 0).await;

    let vault = setup_vault(&server);
    vault.store(EMAIL, &credential(Duration::hours(1))).await.unwrap();
    vault
        .store("other@x.com", &OAuthCredential::new("other", "r2", Utc::now() + Duration::hours(1)))
        .await
        .unwrap();

    vault.clear("other@x.com").await.unwrap();

    assert!(vault.load("other@x.com").await.unwrap().is_none());
    assert_eq!(
        vault.ensure_access_token("USER@x.com").await.unwrap().expose(),
        "old-access"
    );
}
