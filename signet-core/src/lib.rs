//! # Signet Core
//!
//! Synchronization engine that propagates one canonical email signature to
//! the places a mail user reads it from.
//!
//! This crate provides:
//! - Domain types for signatures, bindings, accounts and identities
//! - A native store adapter for the desktop mail client's signature files
//! - A remote store adapter for the webmail send-as settings API
//! - A credential vault that keeps OAuth tokens fresh in the OS keychain
//! - A coordinator that fans a signature out per binding and a ledger of
//!   what each store last accepted
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use signet_core::{
//!     AccountBinding, CancelHandle, CanonicalSignature, DispatchOptions, NativeLayout,
//!     NativeStore, SyncCoordinator, SyncLedger,
//! };
//!
//! async fn publish(layout: NativeLayout) -> Result<(), signet_core::SignetError> {
//!     let ledger = Arc::new(SyncLedger::load()?);
//!     let coordinator = Arc::new(
//!         SyncCoordinator::new(ledger.clone()).with_native(Arc::new(NativeStore::new(layout))),
//!     );
//!
//!     let signature = CanonicalSignature::new("work", "Work", "<p>Jane Doe</p>")
//!         .with_binding(AccountBinding::native("ACCOUNT-UUID").as_default());
//!
//!     let report = coordinator
//!         .dispatch(&signature, DispatchOptions::default(), &CancelHandle::new(), None)
//!         .await?;
//!     ledger.save()?;
//!     println!("{} of {} stores updated", report.recorded(), report.outcomes.len());
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod coordinator;
pub mod destination;
pub mod digest;
pub mod error;
pub mod ledger;
pub mod model;
pub mod native;
pub mod policy;
pub mod provider;
pub mod remote;
pub mod store;
pub mod vault;

#[cfg(feature = "oauth")]
pub mod oauth;

// Re-export commonly used types at crate root
pub use model::{
    AccountBinding,
    BindingError,
    BindingKey,
    CanonicalSignature,
    NativeAccount,
    RemoteIdentity,
    SignatureId,
    StoreKind,
};

pub use store::{
    Secret,
    SecretStore,
    StoreError,
    MemoryStore,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use error::{
    AccessScope,
    ConflictDetail,
    SignetError,
    SyncError,
};

pub use vault::{
    CredentialVault,
    OAuthCredential,
    TokenRefresher,
    TokenSource,
    VaultError,
};

pub use policy::{
    BasicContentPolicy,
    ContentPolicy,
    EmbeddedImagePolicy,
    PolicyFinding,
    Severity,
};

pub use ledger::{
    Baseline,
    LedgerError,
    SyncLedger,
    SyncLedgerEntry,
};

pub use destination::{
    CommitRequest,
    SignatureDestination,
    StoreState,
    WriteReceipt,
};

pub use native::{NativeLayout, NativeStore};

pub use remote::{RemoteStore, RetryPolicy};

pub use coordinator::{
    BindingOutcome,
    CancelHandle,
    DispatchError,
    DispatchOptions,
    DispatchReport,
    OutcomeStatus,
    SyncCoordinator,
    SyncEvent,
    SyncPhase,
};

pub use provider::ProviderConfig;
