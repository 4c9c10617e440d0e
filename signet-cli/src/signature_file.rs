//! The canonical signature document the CLI syncs from.

use anyhow::{Context, Result};
use signet_core::CanonicalSignature;
use std::io::Write;
use std::path::Path;

pub fn load_signature(path: &Path) -> Result<CanonicalSignature> {
    let contents = std::fs::read(path)
        .with_context(|| format!("Failed to read signature from {:?}", path))?;
    serde_json::from_slice(&contents)
        .with_context(|| format!("Failed to parse signature from {:?}", path))
}

/// Replace the document atomically, so an interrupted run never leaves a
/// half-written file.
pub fn save_signature(path: &Path, signature: &CanonicalSignature) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let json = serde_json::to_vec_pretty(signature).context("Failed to serialize signature")?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {:?}", path))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use signet_core::AccountBinding;
    use tempfile::TempDir;

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("work.json");

        let mut signature = CanonicalSignature::new("work", "Work", "<p>Jane</p>")
            .with_binding(AccountBinding::native("ACCT-1").as_default());
        save_signature(&path, &signature).unwrap();

        signature.bindings[0].last_synced_at = Some(Utc::now());
        save_signature(&path, &signature).unwrap();

        let loaded = load_signature(&path).unwrap();
        assert_eq!(loaded, signature);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_load_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{").unwrap();

        let err = load_signature(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.json"));
    }
}
