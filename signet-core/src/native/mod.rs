//! Native mail client store adapter.
//!
//! Reads and writes the client's signature files and keeps its two index
//! documents consistent. All file work runs on the blocking pool; index
//! updates are serialized through one async mutex per adapter.
//!
//! # Layout
//!
//! ```text
//! <mail root>/V<n>/MailData/
//!     Accounts.plist                 discovery fallback
//!     Signatures/
//!         <id>.mailsignature         one per signature
//!         AllSignatures.plist        id -> display name
//!         SignaturesByAccount.plist  per-account ordered ids, first is default
//! ```

pub mod automation;
pub mod fs;
pub mod index;
pub mod layout;
pub mod template;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::codec::{IndexCodec, PlistCodec};
use crate::destination::{detect_conflict, CommitRequest, SignatureDestination, StoreState, WriteReceipt};
use crate::digest::content_hash;
use crate::error::{AccessScope, SyncError};
use crate::ledger::Baseline;
use crate::model::{AccountBinding, CanonicalSignature, NativeAccount, StoreKind};

pub use automation::{
    AutomationAccount, AutomationAvailability, AutomationBridge, AutomationError, OsascriptBridge,
    PgrepProbe, ProcessProbe,
};
pub use index::{IndexLoad, NameIndex, OrderingIndex};
pub use layout::NativeLayout;

use self::fs::{classify_io, modified_at, read_optional, AtomicWriter};
use self::index::{encode_index, load_index};
use self::template::{default_document, SignatureDocument};

/// Error label for failures not tied to one account.
const STORE_LABEL: &str = "mail";

const MANAGED_CLOUD_DOMAINS: [&str; 3] = ["@icloud.com", "@me.com", "@mac.com"];

/// The state shared with blocking file tasks.
struct NativeInner<C> {
    layout: NativeLayout,
    codec: C,
    writer: AtomicWriter,
}

/// Adapter for the native client's signature store.
pub struct NativeStore<C: IndexCodec = PlistCodec> {
    inner: Arc<NativeInner<C>>,
    automation: Arc<dyn AutomationBridge>,
    process: Arc<dyn ProcessProbe>,
    index_lock: Mutex<()>,
}

impl NativeStore<PlistCodec> {
    /// Adapter over property-list indices, using `osascript` and `pgrep`.
    pub fn new(layout: NativeLayout) -> Self {
        Self::with_codec(layout, PlistCodec)
    }
}

impl<C: IndexCodec> NativeStore<C> {
    pub fn with_codec(layout: NativeLayout, codec: C) -> Self {
        Self {
            inner: Arc::new(NativeInner {
                layout,
                codec,
                writer: AtomicWriter::new(),
            }),
            automation: Arc::new(OsascriptBridge),
            process: Arc::new(PgrepProbe::default()),
            index_lock: Mutex::new(()),
        }
    }

    /// Replace the automation bridge.
    pub fn with_automation(mut self, bridge: Arc<dyn AutomationBridge>) -> Self {
        self.automation = bridge;
        self
    }

    /// Replace the process probe.
    pub fn with_process_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.process = probe;
        self
    }

    pub fn layout(&self) -> &NativeLayout {
        &self.inner.layout
    }

    /// Run file work on the blocking pool.
    async fn blocking<T, F>(&self, account: &str, work: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&NativeInner<C>) -> Result<T, SyncError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || work(&inner))
            .await
            .map_err(|e| SyncError::fatal(account, format!("file task failed: {}", e)))?
    }

    /// Enumerate the client's accounts.
    ///
    /// Automation is tried first. When it is unavailable, refused, or finds
    /// nothing, the client's account configuration file is read instead.
    pub async fn discover_accounts(&self) -> Result<Vec<NativeAccount>, SyncError> {
        let mut denied = None;

        match self.automation.probe().await {
            AutomationAvailability::Available => match self.automation.accounts().await {
                Ok(accounts) if !accounts.is_empty() => {
                    tracing::info!("Discovered {} account(s) through automation", accounts.len());
                    let now = Utc::now();
                    return Ok(accounts
                        .into_iter()
                        .map(|a| account_from_automation(a, now))
                        .collect());
                }
                Ok(_) => tracing::debug!("Automation returned no accounts, reading configuration"),
                Err(AutomationError::Denied { message }) => denied = Some(message),
                Err(AutomationError::Failed { message }) => {
                    tracing::warn!("Automation query failed, reading configuration: {}", message);
                }
            },
            AutomationAvailability::Denied { message } => {
                tracing::warn!("Automation permission refused, reading configuration");
                denied = Some(message);
            }
            AutomationAvailability::Unavailable { message } => {
                tracing::debug!("Automation unavailable: {}", message);
            }
        }

        let from_file = self
            .blocking(STORE_LABEL, |inner| inner.read_accounts_file())
            .await;

        match (from_file, denied) {
            (Ok(accounts), _) if !accounts.is_empty() => {
                tracing::info!("Discovered {} account(s) from configuration", accounts.len());
                Ok(accounts)
            }
            (Err(e @ SyncError::AccessDenied { .. }), _) => Err(e),
            (Ok(_) | Err(SyncError::NotConfigured { .. }), Some(message)) => {
                Err(SyncError::AccessDenied {
                    account: STORE_LABEL.to_string(),
                    scope: AccessScope::Automation,
                    message,
                })
            }
            (Ok(_), None) => Err(SyncError::NotConfigured {
                account: STORE_LABEL.to_string(),
                store: StoreKind::Native,
                message: "no accounts are configured in the mail client".to_string(),
            }),
            (Err(e), _) => Err(e),
        }
    }

    /// State of the signature currently assigned to an account (the first
    /// entry of its ordering list).
    pub async fn read_signature_state(&self, account_id: &str) -> Result<Option<StoreState>, SyncError> {
        let account = account_id.to_string();
        self.blocking(account_id, move |inner| {
            let ordering: OrderingIndex =
                load_index(&inner.codec, &account, &inner.layout.ordering_index())?.or_empty();
            match ordering.assigned(&account) {
                Some(id) => inner.read_file_state(&account, id),
                None => Ok(None),
            }
        })
        .await
    }

    /// State of one signature file, whichever account it is assigned to.
    pub async fn read_signature_file_state(
        &self,
        signature_id: &str,
    ) -> Result<Option<StoreState>, SyncError> {
        self.file_state(STORE_LABEL, signature_id).await
    }

    async fn file_state(&self, account: &str, signature_id: &str) -> Result<Option<StoreState>, SyncError> {
        let label = account.to_string();
        let id = signature_id.to_string();
        self.blocking(account, move |inner| inner.read_file_state(&label, &id))
            .await
    }

    /// Write a signature for an account, checking for a conflict first
    /// unless `force` is set.
    pub async fn write_signature(
        &self,
        signature: &CanonicalSignature,
        account_id: &str,
        make_default: bool,
        baseline: Option<&Baseline>,
        force: bool,
    ) -> Result<WriteReceipt, SyncError> {
        if !force {
            let live = self.file_state(account_id, signature.id.as_str()).await?;
            detect_conflict(account_id, baseline, live.as_ref())?;
        }
        self.commit_signature(signature, account_id, make_default).await
    }

    async fn commit_signature(
        &self,
        signature: &CanonicalSignature,
        account_id: &str,
        make_default: bool,
    ) -> Result<WriteReceipt, SyncError> {
        let account = account_id.to_string();
        let id = signature.id.as_str().to_string();
        let name = signature.name.clone();
        let html = signature.html.clone();

        let hash = {
            let _guard = self.index_lock.lock().await;
            self.blocking(account_id, move |inner| {
                inner.write_signature(&account, &id, &name, &html, make_default)
            })
            .await?
        };

        let restart_required = self.mail_running().await;
        let mut warnings = Vec::new();
        if restart_required {
            warnings.push("Mail is running; quit and reopen it to load the new signature".to_string());
        }

        tracing::info!(
            account = account_id,
            signature = %signature.id,
            restart_required,
            "Wrote native signature"
        );

        Ok(WriteReceipt {
            hash,
            written_at: Utc::now(),
            restart_required,
            warnings,
        })
    }

    /// Whether the mail client is running and must be restarted to see writes.
    pub async fn mail_running(&self) -> bool {
        self.process.is_running().await
    }
}

impl<C: IndexCodec> NativeInner<C> {
    fn read_file_state(&self, account: &str, signature_id: &str) -> Result<Option<StoreState>, SyncError> {
        let path = self.layout.signature_file(signature_id);
        let Some(bytes) = read_optional(&path).map_err(|e| classify_io(account, &path, e))? else {
            return Ok(None);
        };

        let document = SignatureDocument::parse(String::from_utf8_lossy(&bytes).into_owned());
        let content = document.content().to_string();

        tracing::debug!(account, signature = signature_id, "Read native signature file");

        Ok(Some(StoreState {
            hash: content_hash(&content),
            content,
            modified_at: modified_at(&path),
        }))
    }

    fn write_signature(
        &self,
        account: &str,
        id: &str,
        name: &str,
        html: &str,
        make_default: bool,
    ) -> Result<String, SyncError> {
        let dir = self.layout.signatures_dir();
        match std::fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(SyncError::NotConfigured {
                    account: account.to_string(),
                    store: StoreKind::Native,
                    message: format!("{} is not a directory", dir.display()),
                });
            }
            Err(e) => return Err(classify_io(account, &dir, e)),
        }

        // Both indices must be readable before anything is replaced.
        let names_path = self.layout.name_index();
        let ordering_path = self.layout.ordering_index();
        let mut names: NameIndex = load_index(&self.codec, account, &names_path)?.or_empty();
        let mut ordering: OrderingIndex = load_index(&self.codec, account, &ordering_path)?.or_empty();

        let target = self.layout.signature_file(id);
        let document = self.compose(account, id, html)?;
        self.writer
            .write(&target, document.as_bytes())
            .map_err(|e| classify_io(account, &target, e))?;

        if names.upsert(id, name) {
            let bytes = encode_index(&self.codec, account, &names_path, &names)?;
            self.writer
                .write(&names_path, &bytes)
                .map_err(|e| classify_io(account, &names_path, e))?;
        }

        let before = ordering.clone();
        ordering.place(account, id, make_default);
        if ordering != before {
            let bytes = encode_index(&self.codec, account, &ordering_path, &ordering)?;
            self.writer
                .write(&ordering_path, &bytes)
                .map_err(|e| classify_io(account, &ordering_path, e))?;
        }

        Ok(content_hash(html))
    }

    /// Build the new file from the best available template.
    fn compose(&self, account: &str, id: &str, html: &str) -> Result<String, SyncError> {
        let own = self.layout.signature_file(id);
        if let Some(document) = read_template(&own).map_err(|e| classify_io(account, &own, e))? {
            return Ok(document.compose(html, None));
        }

        let dir = self.layout.signatures_dir();
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| classify_io(account, &dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path != &own
                    && path.extension().and_then(|e| e.to_str()) == Some(layout::SIGNATURE_EXTENSION)
            })
            .collect();
        candidates.sort();

        for path in candidates {
            match read_template(&path) {
                Ok(Some(document)) => {
                    tracing::debug!(template = %path.display(), "Borrowing signature template");
                    return Ok(document.compose(html, Some(id)));
                }
                Ok(None) => {}
                Err(e) => tracing::debug!("Skipping template {}: {}", path.display(), e),
            }
        }

        Ok(default_document(id, html))
    }

    fn read_accounts_file(&self) -> Result<Vec<NativeAccount>, SyncError> {
        let path = self.layout.accounts_file();
        let Some(bytes) = read_optional(&path).map_err(|e| classify_io(STORE_LABEL, &path, e))? else {
            return Ok(Vec::new());
        };

        let document: AccountsDocument = self.codec.decode(&bytes).map_err(|e| {
            SyncError::fatal(STORE_LABEL, format!("{} is corrupt: {}", path.display(), e))
        })?;

        let now = Utc::now();
        Ok(document
            .mail_accounts
            .into_iter()
            .filter_map(|record| record.into_account(now))
            .collect())
    }
}

/// A file usable as a template: present, UTF-8, not transfer-encoded.
fn read_template(path: &std::path::Path) -> std::io::Result<Option<SignatureDocument>> {
    let Some(bytes) = read_optional(path)? else {
        return Ok(None);
    };
    let Ok(text) = String::from_utf8(bytes) else {
        return Ok(None);
    };
    let document = SignatureDocument::parse(text);
    Ok((!document.is_encoded()).then_some(document))
}

#[derive(Debug, Deserialize)]
struct AccountsDocument {
    #[serde(rename = "MailAccounts", default)]
    mail_accounts: Vec<AccountRecord>,
}

#[derive(Debug, Deserialize)]
struct AccountRecord {
    #[serde(rename = "uniqueId")]
    unique_id: Option<String>,

    #[serde(rename = "AccountName")]
    account_name: Option<String>,

    #[serde(rename = "AccountType")]
    account_type: Option<String>,

    #[serde(rename = "EmailAddresses", default)]
    email_addresses: Vec<String>,

    #[serde(rename = "FullUserName")]
    full_user_name: Option<String>,
}

impl AccountRecord {
    /// Local mailboxes carry no id or address and are skipped.
    fn into_account(self, now: chrono::DateTime<Utc>) -> Option<NativeAccount> {
        let id = self.unique_id.filter(|id| !id.is_empty())?;
        let email = self.email_addresses.into_iter().next()?;
        let kind = self.account_type.unwrap_or_default();

        Some(NativeAccount {
            is_managed_cloud: is_managed_cloud(&kind, &email),
            display_name: self
                .account_name
                .or(self.full_user_name)
                .unwrap_or_else(|| email.clone()),
            id,
            email,
            discovered_at: now,
        })
    }
}

fn account_from_automation(account: AutomationAccount, now: chrono::DateTime<Utc>) -> NativeAccount {
    let email = account.emails.into_iter().next().unwrap_or_default();
    let display_name = if account.name.is_empty() {
        account.full_name
    } else {
        account.name
    };

    NativeAccount {
        is_managed_cloud: is_managed_cloud(&account.account_type, &email),
        id: account.id,
        email,
        display_name,
        discovered_at: now,
    }
}

fn is_managed_cloud(account_type: &str, email: &str) -> bool {
    let kind = account_type.to_ascii_lowercase();
    let email = email.to_ascii_lowercase();
    kind.contains("icloud")
        || kind.contains("itools")
        || MANAGED_CLOUD_DOMAINS.iter().any(|domain| email.ends_with(domain))
}

#[async_trait]
impl<C: IndexCodec> SignatureDestination for NativeStore<C> {
    fn kind(&self) -> StoreKind {
        StoreKind::Native
    }

    async fn check_conflict(
        &self,
        signature: &CanonicalSignature,
        binding: &AccountBinding,
        baseline: Option<&Baseline>,
    ) -> Result<Option<StoreState>, SyncError> {
        let live = self.file_state(&binding.account, signature.id.as_str()).await?;
        detect_conflict(&binding.account, baseline, live.as_ref())?;
        Ok(live)
    }

    async fn commit(
        &self,
        signature: &CanonicalSignature,
        binding: &AccountBinding,
        request: &CommitRequest,
    ) -> Result<WriteReceipt, SyncError> {
        self.commit_signature(signature, &binding.account, request.make_default)
            .await
    }
}
