//! Sync coordinator.
//!
//! Drives one unit of work per (signature, binding):
//!
//! ```text
//! Idle -> Validating -> Blocked
//!                    -> Checking -> ConflictPending
//!                                -> Writing -> Recorded | Failed
//! ```
//!
//! Units for different bindings run concurrently; units for the same binding
//! queue behind each other. The ledger is only touched once a unit has been
//! recorded.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::destination::{CommitRequest, SignatureDestination, WriteReceipt};
use crate::error::{ConflictDetail, SyncError};
use crate::ledger::SyncLedger;
use crate::model::{AccountBinding, BindingError, BindingKey, CanonicalSignature, SignatureId, StoreKind};
use crate::policy::{BasicContentPolicy, ContentPolicy, EmbeddedImagePolicy, PolicyFinding};

/// Where a unit of work is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Queued, waiting for the binding's lock.
    Idle,
    Validating,
    Blocked,
    Checking,
    ConflictPending,
    Writing,
    Recorded,
    Failed,
    /// Cancelled before it started.
    Skipped,
}

impl SyncPhase {
    /// Whether the unit is finished.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Blocked | Self::ConflictPending | Self::Recorded | Self::Failed | Self::Skipped
        )
    }
}

/// A phase change of one binding's unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncEvent {
    pub key: BindingKey,
    pub phase: SyncPhase,
    pub at: DateTime<Utc>,
}

pub type EventSender = mpsc::UnboundedSender<SyncEvent>;

/// Cooperative cancellation for a dispatch.
///
/// Units check it once they hold their binding's lock; units already past
/// that point run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Caller choices for one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Write even when a store diverged from its baseline.
    pub force: bool,

    pub embedded_images: EmbeddedImagePolicy,
}

/// Terminal result of one unit.
#[derive(Debug, Clone)]
pub enum OutcomeStatus {
    Recorded { receipt: WriteReceipt },
    Blocked { findings: Vec<PolicyFinding> },
    Conflict { detail: ConflictDetail },
    Failed { error: SyncError },
    Skipped,
}

/// What happened to one binding.
#[derive(Debug, Clone)]
pub struct BindingOutcome {
    pub key: BindingKey,
    pub status: OutcomeStatus,

    /// Soft policy findings; never block.
    pub advisories: Vec<PolicyFinding>,
}

impl BindingOutcome {
    fn new(key: BindingKey, status: OutcomeStatus) -> Self {
        Self {
            key,
            status,
            advisories: Vec::new(),
        }
    }

    pub fn is_recorded(&self) -> bool {
        matches!(self.status, OutcomeStatus::Recorded { .. })
    }

    /// The failure as a [`SyncError`], for reporting. `None` for recorded
    /// and skipped units.
    pub fn error(&self) -> Option<SyncError> {
        let account = self.key.account.clone();
        match &self.status {
            OutcomeStatus::Recorded { .. } | OutcomeStatus::Skipped => None,
            OutcomeStatus::Blocked { findings } => Some(SyncError::ValidationBlocked {
                account,
                findings: findings.clone(),
            }),
            OutcomeStatus::Conflict { detail } => Some(SyncError::Conflict {
                account,
                detail: detail.clone(),
            }),
            OutcomeStatus::Failed { error } => Some(error.clone()),
        }
    }
}

/// Per-binding outcomes of one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub signature_id: SignatureId,

    /// One outcome per binding, in binding order.
    pub outcomes: Vec<BindingOutcome>,

    /// The signature's bindings with last-sync timestamps advanced for
    /// recorded units.
    pub bindings: Vec<AccountBinding>,
}

impl DispatchReport {
    pub fn recorded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_recorded()).count()
    }

    pub fn conflicts(&self) -> impl Iterator<Item = (&BindingKey, &ConflictDetail)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            OutcomeStatus::Conflict { detail } => Some((&o.key, detail)),
            _ => None,
        })
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid bindings: {0}")]
    InvalidBindings(#[from] BindingError),
}

/// Orchestrates units of work against the configured stores.
pub struct SyncCoordinator {
    native: Option<Arc<dyn SignatureDestination>>,
    remote: Option<Arc<dyn SignatureDestination>>,
    policy: Arc<dyn ContentPolicy>,
    ledger: Arc<SyncLedger>,
    binding_locks: Mutex<HashMap<BindingKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncCoordinator {
    /// A coordinator with no stores and the built-in content policy.
    pub fn new(ledger: Arc<SyncLedger>) -> Self {
        Self {
            native: None,
            remote: None,
            policy: Arc::new(BasicContentPolicy),
            ledger,
            binding_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_native(mut self, native: Arc<dyn SignatureDestination>) -> Self {
        self.native = Some(native);
        self
    }

    pub fn with_remote(mut self, remote: Arc<dyn SignatureDestination>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn ContentPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn ledger(&self) -> &Arc<SyncLedger> {
        &self.ledger
    }

    fn destination(&self, kind: StoreKind) -> Option<&Arc<dyn SignatureDestination>> {
        match kind {
            StoreKind::Native => self.native.as_ref(),
            StoreKind::Remote => self.remote.as_ref(),
        }
    }

    fn binding_lock(&self, key: &BindingKey) -> Arc<tokio::sync::Mutex<()>> {
        self.binding_locks.lock().entry(key.clone()).or_default().clone()
    }

    /// Run one binding's unit, queueing behind any unit already running
    /// for the same binding.
    pub async fn sync_binding(
        &self,
        signature: &CanonicalSignature,
        binding: &AccountBinding,
        options: DispatchOptions,
        events: Option<&EventSender>,
    ) -> BindingOutcome {
        let key = binding.key();
        emit(events, &key, SyncPhase::Idle);

        let lock = self.binding_lock(&key);
        let _guard = lock.lock().await;
        self.run_unit(signature, binding, options, events).await
    }

    /// Fan a signature out to every binding.
    ///
    /// Bindings are validated first. Each binding then gets its own task;
    /// a failure on one never affects the others.
    pub async fn dispatch(
        self: &Arc<Self>,
        signature: &CanonicalSignature,
        options: DispatchOptions,
        cancel: &CancelHandle,
        events: Option<EventSender>,
    ) -> Result<DispatchReport, DispatchError> {
        signature.validate_bindings()?;

        tracing::info!(
            signature = %signature.id,
            bindings = signature.bindings.len(),
            force = options.force,
            "Dispatching signature"
        );

        let shared = Arc::new(signature.clone());
        let mut units = JoinSet::new();

        for (index, binding) in signature.bindings.iter().enumerate() {
            let coordinator = Arc::clone(self);
            let signature = Arc::clone(&shared);
            let binding = binding.clone();
            let cancel = cancel.clone();
            let events = events.clone();

            units.spawn(async move {
                let key = binding.key();
                emit(events.as_ref(), &key, SyncPhase::Idle);

                let lock = coordinator.binding_lock(&key);
                let _guard = lock.lock().await;

                if cancel.is_cancelled() {
                    tracing::debug!(binding = %key, "Dispatch cancelled, skipping");
                    emit(events.as_ref(), &key, SyncPhase::Skipped);
                    return (index, BindingOutcome::new(key, OutcomeStatus::Skipped));
                }

                let outcome = coordinator
                    .run_unit(&signature, &binding, options, events.as_ref())
                    .await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<BindingOutcome>> = vec![None; signature.bindings.len()];
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => tracing::error!("Sync unit panicked: {}", e),
            }
        }

        let mut bindings = signature.bindings.clone();
        let outcomes = slots
            .into_iter()
            .zip(bindings.iter_mut())
            .map(|(slot, binding)| {
                let outcome = slot.unwrap_or_else(|| {
                    BindingOutcome::new(
                        binding.key(),
                        OutcomeStatus::Failed {
                            error: SyncError::fatal(&binding.account, "sync task aborted"),
                        },
                    )
                });
                if let OutcomeStatus::Recorded { receipt } = &outcome.status {
                    binding.last_synced_at = Some(receipt.written_at);
                }
                outcome
            })
            .collect::<Vec<_>>();

        let report = DispatchReport {
            signature_id: signature.id.clone(),
            outcomes,
            bindings,
        };

        tracing::info!(
            signature = %report.signature_id,
            recorded = report.recorded(),
            total = report.outcomes.len(),
            "Dispatch finished"
        );

        Ok(report)
    }

    async fn run_unit(
        &self,
        signature: &CanonicalSignature,
        binding: &AccountBinding,
        options: DispatchOptions,
        events: Option<&EventSender>,
    ) -> BindingOutcome {
        let key = binding.key();

        emit(events, &key, SyncPhase::Validating);
        let (hard, advisories): (Vec<_>, Vec<_>) = self
            .policy
            .evaluate(&signature.html, binding.store, options.embedded_images)
            .into_iter()
            .partition(PolicyFinding::is_hard);

        let finish = |phase: SyncPhase, status: OutcomeStatus| {
            emit(events, &key, phase);
            BindingOutcome {
                key: key.clone(),
                status,
                advisories: advisories.clone(),
            }
        };

        if !hard.is_empty() {
            tracing::warn!(binding = %key, findings = hard.len(), "Blocked by content policy");
            return finish(SyncPhase::Blocked, OutcomeStatus::Blocked { findings: hard });
        }

        let Some(destination) = self.destination(binding.store) else {
            let error = SyncError::NotConfigured {
                account: binding.account.clone(),
                store: binding.store,
                message: format!("no {} store is configured", binding.store),
            };
            return finish(SyncPhase::Failed, OutcomeStatus::Failed { error });
        };

        if !options.force {
            emit(events, &key, SyncPhase::Checking);
            let baseline = self.ledger.baseline(&key);
            match destination
                .check_conflict(signature, binding, baseline.as_ref())
                .await
            {
                Ok(_) => {}
                Err(SyncError::Conflict { detail, .. }) => {
                    tracing::warn!(binding = %key, "Conflict: {}", detail);
                    return finish(SyncPhase::ConflictPending, OutcomeStatus::Conflict { detail });
                }
                Err(error) => {
                    tracing::warn!(binding = %key, "Conflict check failed: {}", error);
                    return finish(SyncPhase::Failed, OutcomeStatus::Failed { error });
                }
            }
        }

        emit(events, &key, SyncPhase::Writing);
        let request = CommitRequest {
            make_default: binding.is_default,
            embedded_images: options.embedded_images,
        };

        match destination.commit(signature, binding, &request).await {
            Ok(receipt) => {
                self.ledger
                    .record_success(&key, receipt.hash.clone(), receipt.written_at);
                tracing::info!(binding = %key, "Recorded sync");
                finish(SyncPhase::Recorded, OutcomeStatus::Recorded { receipt })
            }
            Err(SyncError::ValidationBlocked { findings, .. }) => {
                finish(SyncPhase::Blocked, OutcomeStatus::Blocked { findings })
            }
            Err(SyncError::Conflict { detail, .. }) => {
                finish(SyncPhase::ConflictPending, OutcomeStatus::Conflict { detail })
            }
            Err(error) => {
                tracing::warn!(binding = %key, "Write failed: {}", error);
                finish(SyncPhase::Failed, OutcomeStatus::Failed { error })
            }
        }
    }
}

fn emit(events: Option<&EventSender>, key: &BindingKey, phase: SyncPhase) {
    if let Some(tx) = events {
        // A dropped receiver only means nobody is listening.
        let _ = tx.send(SyncEvent {
            key: key.clone(),
            phase,
            at: Utc::now(),
        });
    }
}
