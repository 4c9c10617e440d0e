//! Crash-safe file replacement and I/O error classification.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::layout::backup_path;
use crate::error::{AccessScope, SyncError};
use crate::model::StoreKind;

/// Replaces files atomically, backing each path up once.
///
/// The backup set lives as long as the writer, so one adapter instance
/// backs a given file up at most once.
#[derive(Debug, Default)]
pub struct AtomicWriter {
    backed_up: Mutex<HashSet<PathBuf>>,
}

impl AtomicWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `bytes` to `path` through a synced temp file in the same
    /// directory, then rename it over the target.
    pub fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let dir = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "target has no parent directory")
        })?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".signet-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;

        self.backup_once(path)?;

        tmp.persist(path).map_err(|e| e.error)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Replaced file");
        Ok(())
    }

    fn backup_once(&self, path: &Path) -> io::Result<()> {
        let mut backed_up = self.backed_up.lock();
        if backed_up.contains(path) {
            return Ok(());
        }

        match fs::copy(path, backup_path(path)) {
            Ok(_) => {
                tracing::debug!(path = %path.display(), "Backed up file before first replace");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        backed_up.insert(path.to_path_buf());
        Ok(())
    }
}

/// Read a file, mapping "not found" to `None`.
pub fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Modification time of a file, if the platform reports one.
pub fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Map an I/O failure on `path` into the sync error taxonomy.
pub fn classify_io(account: &str, path: &Path, err: io::Error) -> SyncError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => SyncError::AccessDenied {
            account: account.to_string(),
            scope: AccessScope::Filesystem,
            message: format!("{}: {}", path.display(), err),
        },
        io::ErrorKind::NotFound => SyncError::NotConfigured {
            account: account.to_string(),
            store: StoreKind::Native,
            message: format!("{} does not exist", path.display()),
        },
        _ => SyncError::fatal(account, format!("{}: {}", path.display(), err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_backs_up_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("S1.mailsignature");
        fs::write(&path, b"original").unwrap();

        let writer = AtomicWriter::new();
        writer.write(&path, b"first").unwrap();
        writer.write(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert_eq!(fs::read(backup_path(&path)).unwrap(), b"original");
    }

    #[test]
    fn test_write_new_file_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("AllSignatures.plist");

        AtomicWriter::new().write(&path, b"<plist/>").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("AllSignatures.plist")]);
    }

    #[test]
    fn test_classify_io() {
        let path = Path::new("/mail/V10");
        let denied = classify_io("acc", path, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(
            denied,
            SyncError::AccessDenied {
                scope: AccessScope::Filesystem,
                ..
            }
        ));

        let missing = classify_io("acc", path, io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(missing, SyncError::NotConfigured { .. }));

        let other = classify_io("acc", path, io::Error::other("disk full"));
        assert!(matches!(other, SyncError::Fatal { .. }));
    }
}
