//! On-disk layout of the native mail client's data directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const SIGNATURE_EXTENSION: &str = "mailsignature";
pub const BACKUP_SUFFIX: &str = ".signet-backup";

const NAME_INDEX: &str = "AllSignatures.plist";
const ORDERING_INDEX: &str = "SignaturesByAccount.plist";
const ACCOUNTS_FILE: &str = "Accounts.plist";

/// Paths under one versioned data directory, e.g. `~/Library/Mail/V10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLayout {
    mail_root: PathBuf,
    version: u32,
}

impl NativeLayout {
    /// Use a specific `V<n>` directory.
    pub fn new(mail_root: impl Into<PathBuf>, version: u32) -> Self {
        Self {
            mail_root: mail_root.into(),
            version,
        }
    }

    /// Pick the highest `V<n>` directory under `mail_root`.
    ///
    /// Returns `Ok(None)` when the root exists but holds no versioned
    /// directory.
    pub fn detect(mail_root: impl Into<PathBuf>) -> io::Result<Option<Self>> {
        let mail_root = mail_root.into();

        let mut highest = None;
        for entry in fs::read_dir(&mail_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let version = name
                .to_str()
                .and_then(|n| n.strip_prefix('V'))
                .and_then(|n| n.parse::<u32>().ok());
            if let Some(v) = version {
                highest = highest.max(Some(v));
            }
        }

        Ok(highest.map(|version| Self { mail_root, version }))
    }

    /// The mail root, e.g. `~/Library/Mail`.
    pub fn mail_root(&self) -> &Path {
        &self.mail_root
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// `V<n>/MailData`
    pub fn mail_data_dir(&self) -> PathBuf {
        self.mail_root
            .join(format!("V{}", self.version))
            .join("MailData")
    }

    /// `V<n>/MailData/Signatures`
    pub fn signatures_dir(&self) -> PathBuf {
        self.mail_data_dir().join("Signatures")
    }

    /// Content file for one signature.
    pub fn signature_file(&self, id: &str) -> PathBuf {
        self.signatures_dir()
            .join(format!("{}.{}", id, SIGNATURE_EXTENSION))
    }

    /// Name index: signature id to display name.
    pub fn name_index(&self) -> PathBuf {
        self.signatures_dir().join(NAME_INDEX)
    }

    /// Ordering index: account id to ordered signature ids.
    pub fn ordering_index(&self) -> PathBuf {
        self.signatures_dir().join(ORDERING_INDEX)
    }

    /// Per-account configuration read by the discovery fallback.
    pub fn accounts_file(&self) -> PathBuf {
        self.mail_data_dir().join(ACCOUNTS_FILE)
    }
}

/// Where the pre-replace copy of `path` goes.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(BACKUP_SUFFIX);
    path.with_file_name(name)
}
