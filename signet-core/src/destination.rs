//! The seam between the coordinator and the two store adapters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConflictDetail, SyncError};
use crate::ledger::Baseline;
use crate::model::{AccountBinding, CanonicalSignature, StoreKind};
use crate::policy::EmbeddedImagePolicy;

/// A store's live copy of a binding's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreState {
    /// Hash of the signature content as the store holds it.
    pub hash: String,

    /// The content itself.
    pub content: String,

    /// Last modification time, when the store reports one.
    pub modified_at: Option<DateTime<Utc>>,
}

/// Proof of a committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    /// Hash of the content the store now holds; becomes the new baseline.
    pub hash: String,

    pub written_at: DateTime<Utc>,

    /// The native client must be restarted before it shows the change.
    #[serde(default)]
    pub restart_required: bool,

    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Per-commit options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitRequest {
    /// Make the signature the account's default.
    pub make_default: bool,

    pub embedded_images: EmbeddedImagePolicy,
}

/// A store the coordinator can write signatures to.
#[async_trait]
pub trait SignatureDestination: Send + Sync {
    /// Which store kind this adapter serves.
    fn kind(&self) -> StoreKind;

    /// Read the live copy for `binding` and compare it with `baseline`.
    ///
    /// Returns the live state (if any) when there is no conflict, and
    /// [`SyncError::Conflict`] when there is.
    async fn check_conflict(
        &self,
        signature: &CanonicalSignature,
        binding: &AccountBinding,
        baseline: Option<&Baseline>,
    ) -> Result<Option<StoreState>, SyncError>;

    /// Write the signature for `binding`.
    async fn commit(
        &self,
        signature: &CanonicalSignature,
        binding: &AccountBinding,
        request: &CommitRequest,
    ) -> Result<WriteReceipt, SyncError>;
}

/// Conflict rule shared by both adapters.
///
/// Without a baseline (first sync) nothing can conflict. With one, the live
/// content must hash to the baseline; content that disappeared counts as a
/// divergence too.
pub fn detect_conflict(
    account: &str,
    baseline: Option<&Baseline>,
    live: Option<&StoreState>,
) -> Result<(), SyncError> {
    let Some(baseline) = baseline else {
        return Ok(());
    };

    match live {
        Some(state) if state.hash == baseline.hash => Ok(()),
        other => Err(SyncError::Conflict {
            account: account.to_string(),
            detail: ConflictDetail {
                expected_hash: baseline.hash.clone(),
                found_hash: other.map(|s| s.hash.clone()),
                modified_at: other.and_then(|s| s.modified_at),
                baseline_synced_at: baseline.synced_at,
            },
        }),
    }
}
