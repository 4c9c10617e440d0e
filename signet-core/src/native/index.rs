//! The native store's two bookkeeping indices.
//!
//! - [`NameIndex`] (`AllSignatures.plist`): one record per signature, id and
//!   display name.
//! - [`OrderingIndex`] (`SignaturesByAccount.plist`): an array of per-account
//!   records, each with the account's ordered signature ids; the first one is
//!   the account's default. The [`ALL_SIGNATURES`] record lists every
//!   signature.
//!
//! Keys the client writes that are not modelled here are carried through
//! unchanged, and records keep their order.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::fs::{classify_io, read_optional};
use crate::codec::IndexCodec;
use crate::error::SyncError;

/// Account key of the ordering record that lists every signature.
pub const ALL_SIGNATURES: &str = "ALL_SIGNATURES";

/// One record of the name index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureRecord {
    #[serde(rename = "SignatureIsRich", default)]
    pub is_rich: bool,

    #[serde(rename = "SignatureName")]
    pub name: String,

    #[serde(rename = "SignatureUniqueId")]
    pub id: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, plist::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameIndex(Vec<SignatureRecord>);

impl NameIndex {
    /// Insert a record, or rename the existing one. Returns whether anything changed.
    pub fn upsert(&mut self, id: &str, name: &str) -> bool {
        match self.0.iter_mut().find(|r| r.id == id) {
            Some(record) if record.name == name && record.is_rich => false,
            Some(record) => {
                record.name = name.to_string();
                record.is_rich = true;
                true
            }
            None => {
                self.0.push(SignatureRecord {
                    is_rich: true,
                    name: name.to_string(),
                    id: id.to_string(),
                    extra: BTreeMap::new(),
                });
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&SignatureRecord> {
        self.0.iter().find(|r| r.id == id)
    }

    pub fn records(&self) -> &[SignatureRecord] {
        &self.0
    }
}

/// One account's entry in the ordering index.
///
/// Older stores name the account by `AccountURL`, newer ones by
/// `AccountUUID`. Whichever spelling a record was read with is the one
/// written back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSignatures {
    #[serde(rename = "AccountURL", default, skip_serializing_if = "Option::is_none")]
    pub account_url: Option<String>,

    #[serde(rename = "AccountUUID", default, skip_serializing_if = "Option::is_none")]
    pub account_uuid: Option<String>,

    #[serde(rename = "Signatures", default)]
    pub signatures: Vec<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, plist::Value>,
}

impl AccountSignatures {
    /// The account this record belongs to.
    pub fn account(&self) -> Option<&str> {
        self.account_uuid
            .as_deref()
            .or(self.account_url.as_deref())
    }

    fn is_for(&self, account: &str) -> bool {
        self.account_uuid.as_deref() == Some(account) || self.account_url.as_deref() == Some(account)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderingIndex(Vec<AccountSignatures>);

impl OrderingIndex {
    /// Place `id` in the account's list and make sure the
    /// [`ALL_SIGNATURES`] record contains it.
    ///
    /// A default goes to position 0. Otherwise an id already present keeps
    /// its position and a new one is appended. Duplicates are removed
    /// either way.
    pub fn place(&mut self, account: &str, id: &str, make_default: bool) {
        let list = &mut self.record_mut(account).signatures;

        let mut seen = std::collections::HashSet::new();
        list.retain(|entry| seen.insert(entry.clone()));

        if make_default {
            list.retain(|entry| entry != id);
            list.insert(0, id.to_string());
        } else if !list.iter().any(|entry| entry == id) {
            list.push(id.to_string());
        }

        if account != ALL_SIGNATURES {
            let all = &mut self.record_mut(ALL_SIGNATURES).signatures;
            if !all.iter().any(|entry| entry == id) {
                all.push(id.to_string());
            }
        }
    }

    /// The account's ordered signature ids.
    pub fn signatures(&self, account: &str) -> &[String] {
        self.0
            .iter()
            .find(|record| record.is_for(account))
            .map(|record| record.signatures.as_slice())
            .unwrap_or_default()
    }

    /// The account's default signature.
    pub fn assigned(&self, account: &str) -> Option<&str> {
        self.signatures(account).first().map(String::as_str)
    }

    pub fn records(&self) -> &[AccountSignatures] {
        &self.0
    }

    /// The account's record, appended with the spelling the file already
    /// uses when missing.
    fn record_mut(&mut self, account: &str) -> &mut AccountSignatures {
        let position = match self.0.iter().position(|record| record.is_for(account)) {
            Some(position) => position,
            None => {
                let by_url = self
                    .0
                    .iter()
                    .any(|record| record.account_url.is_some() && record.account_uuid.is_none());
                let mut record = AccountSignatures::default();
                if by_url {
                    record.account_url = Some(account.to_string());
                } else {
                    record.account_uuid = Some(account.to_string());
                }
                self.0.push(record);
                self.0.len() - 1
            }
        };
        &mut self.0[position]
    }
}

/// Result of reading an index file.
#[derive(Debug)]
pub enum IndexLoad<T> {
    /// No file yet; start empty.
    Absent,
    Loaded(T),
}

impl<T: Default> IndexLoad<T> {
    pub fn or_empty(self) -> T {
        match self {
            Self::Absent => T::default(),
            Self::Loaded(index) => index,
        }
    }
}

/// Read and decode an index file.
///
/// A file that exists but cannot be decoded is fatal; writing over it would
/// destroy the client's bookkeeping.
pub fn load_index<T: DeserializeOwned, C: IndexCodec>(
    codec: &C,
    account: &str,
    path: &Path,
) -> Result<IndexLoad<T>, SyncError> {
    let Some(bytes) = read_optional(path).map_err(|e| classify_io(account, path, e))? else {
        return Ok(IndexLoad::Absent);
    };

    codec
        .decode(&bytes)
        .map(IndexLoad::Loaded)
        .map_err(|e| SyncError::fatal(account, format!("{} is corrupt: {}", path.display(), e)))
}

/// Encode an index for writing.
pub fn encode_index<T: Serialize, C: IndexCodec>(
    codec: &C,
    account: &str,
    path: &Path,
    index: &T,
) -> Result<Vec<u8>, SyncError> {
    codec
        .encode(index)
        .map_err(|e| SyncError::fatal(account, format!("{}: {}", path.display(), e)))
}
