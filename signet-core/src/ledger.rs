//! Sync ledger persistence.
//!
//! The ledger maps each binding's identity key to the content hash this
//! engine last wrote or confirmed there. That hash is the baseline conflict
//! detection compares a store's live content against.
//!
//! # Storage Location
//!
//! The CLI keeps the ledger at `~/.local/share/signet/ledger.json` on Linux,
//! `~/Library/Application Support/com.raibid-labs.signet/ledger.json` on macOS
//! and `%APPDATA%\raibid-labs\signet\data\ledger.json` on Windows.
//!
//! # Example
//!
//! ```rust,ignore
//! use signet_core::{AccountBinding, SyncLedger};
//!
//! let ledger = SyncLedger::load()?;
//! let key = AccountBinding::native("acc-1").key();
//! if let Some(baseline) = ledger.baseline(&key) {
//!     println!("last synced {}", baseline.synced_at);
//! }
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::error::ConflictDetail;
use crate::model::BindingKey;

const LEDGER_VERSION: u32 = 1;

/// Error type for ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// I/O error reading or writing the ledger.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Data directory not available.
    #[error("data directory not available")]
    DataDirUnavailable,

    /// The document was written by a newer version.
    #[error("unsupported ledger version {found}")]
    UnsupportedVersion { found: u32 },
}

/// What conflict detection compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    pub hash: String,
    pub synced_at: DateTime<Utc>,
}

/// One binding's reconciliation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLedgerEntry {
    pub key: BindingKey,
    pub last_synced_at: DateTime<Utc>,

    /// Hash of the content last written or confirmed by this engine.
    pub content_hash: String,

    /// Set when a dispatch found the store diverged; cleared by the next
    /// successful write.
    #[serde(default)]
    pub conflict: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_detail: Option<ConflictDetail>,
}

impl SyncLedgerEntry {
    pub fn baseline(&self) -> Baseline {
        Baseline {
            hash: self.content_hash.clone(),
            synced_at: self.last_synced_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerData {
    version: u32,
    entries: BTreeMap<String, SyncLedgerEntry>,
}

impl Default for LedgerData {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// Durable map from binding identity key to last-synced state.
///
/// Safe to share across tasks; mutations only touch memory until
/// [`save`](Self::save) is called.
#[derive(Debug, Default)]
pub struct SyncLedger {
    path: Option<PathBuf>,
    data: RwLock<LedgerData>,
}

impl SyncLedger {
    /// A ledger that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Get the default storage path for the ledger.
    pub fn default_path() -> Result<PathBuf, LedgerError> {
        let dirs = directories::ProjectDirs::from("com", "raibid-labs", "signet")
            .ok_or(LedgerError::DataDirUnavailable)?;

        Ok(dirs.data_dir().join("ledger.json"))
    }

    /// Load the ledger from the default location.
    pub fn load() -> Result<Self, LedgerError> {
        Self::load_from_path(Self::default_path()?)
    }

    /// Load the ledger from a specific path.
    ///
    /// A missing file is an empty ledger; an unreadable one is an error.
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();

        let data = match fs::read(&path) {
            Ok(bytes) => {
                let data: LedgerData = serde_json::from_slice(&bytes)?;
                if data.version > LEDGER_VERSION {
                    return Err(LedgerError::UnsupportedVersion {
                        found: data.version,
                    });
                }
                data
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LedgerData::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), entries = data.entries.len(), "Loaded sync ledger");

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// Where [`save`](Self::save) writes, if anywhere.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get the entry for a binding.
    pub fn get(&self, key: &BindingKey) -> Option<SyncLedgerEntry> {
        self.data.read().entries.get(&key.to_string()).cloned()
    }

    /// The baseline for a binding, `None` before its first sync.
    pub fn baseline(&self, key: &BindingKey) -> Option<Baseline> {
        self.get(key).map(|entry| entry.baseline())
    }

    /// Record a successful write or confirmation and clear any conflict flag.
    pub fn record_success(&self, key: &BindingKey, content_hash: impl Into<String>, at: DateTime<Utc>) {
        let entry = SyncLedgerEntry {
            key: key.clone(),
            last_synced_at: at,
            content_hash: content_hash.into(),
            conflict: false,
            conflict_detail: None,
        };
        self.data.write().entries.insert(key.to_string(), entry);
    }

    /// Flag a binding as awaiting a conflict decision.
    ///
    /// The baseline hash is kept so a later dispatch still detects the
    /// divergence. Returns `false` when the binding has no entry.
    pub fn flag_conflict(&self, key: &BindingKey, detail: ConflictDetail) -> bool {
        match self.data.write().entries.get_mut(&key.to_string()) {
            Some(entry) => {
                entry.conflict = true;
                entry.conflict_detail = Some(detail);
                true
            }
            None => false,
        }
    }

    /// All entries, ordered by key.
    pub fn entries(&self) -> Vec<SyncLedgerEntry> {
        self.data.read().entries.values().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.data.read().entries.len()
    }

    /// Whether the ledger has no entries.
    pub fn is_empty(&self) -> bool {
        self.data.read().entries.is_empty()
    }

    /// Write the ledger to its path, replacing the previous file atomically.
    ///
    /// A no-op for in-memory ledgers.
    pub fn save(&self) -> Result<(), LedgerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let contents = serde_json::to_vec_pretty(&*self.data.read())?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&contents)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| LedgerError::Io(e.error))?;

        tracing::debug!(path = %path.display(), "Saved sync ledger");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AccountBinding;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = SyncLedger::load_from_path(dir.path().join("ledger.json")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(
            SyncLedger::load_from_path(&path),
            Err(LedgerError::Json(_))
        ));
    }

    #[test]
    fn test_record_save_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("ledger.json");
        let key = AccountBinding::remote("user@x.com").with_alias("sales@x.com").key();
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let ledger = SyncLedger::load_from_path(&path).unwrap();
        ledger.record_success(&key, "abc", at);
        ledger.save().unwrap();

        let reloaded = SyncLedger::load_from_path(&path).unwrap();
        assert_eq!(
            reloaded.baseline(&key),
            Some(Baseline {
                hash: "abc".to_string(),
                synced_at: at
            })
        );
        assert_eq!(reloaded.entries()[0].key, key);
    }

    #[test]
    fn test_conflict_flag_cleared_by_success() {
        let ledger = SyncLedger::in_memory();
        let key = AccountBinding::native("acc-1").key();
        let at = Utc::now();

        let detail = ConflictDetail {
            expected_hash: "abc".to_string(),
            found_hash: Some("def".to_string()),
            modified_at: None,
            baseline_synced_at: at,
        };
        assert!(!ledger.flag_conflict(&key, detail.clone()));

        ledger.record_success(&key, "abc", at);
        assert!(ledger.flag_conflict(&key, detail));
        let flagged = ledger.get(&key).unwrap();
        assert!(flagged.conflict);
        assert_eq!(flagged.content_hash, "abc");

        ledger.record_success(&key, "ghi", Utc::now());
        let cleared = ledger.get(&key).unwrap();
        assert!(!cleared.conflict);
        assert!(cleared.conflict_detail.is_none());
    }

    #[test]
    fn test_newer_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, br#"{"version": 99, "entries": {}}"#).unwrap();

        assert!(matches!(
            SyncLedger::load_from_path(&path),
            Err(LedgerError::UnsupportedVersion { found: 99 })
        ));
    }
}
