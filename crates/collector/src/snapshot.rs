use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Write the raw rank response bytes to `<dir>/gmgn_rank_<YYYYMMDD>.json`.
///
/// Best-effort from the pipeline's point of view: callers log failures and
/// carry on, the batch never depends on the snapshot landing on disk.
pub fn persist_raw(dir: &Path, sync_date: &str, body: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating snapshot dir {}", dir.display()))?;
    let path = dir.join(format!("gmgn_rank_{sync_date}.json"));
    std::fs::write(&path, body)
        .with_context(|| format!("writing snapshot {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_raw_writes_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = persist_raw(dir.path(), "20260830", br#"{"data":[]}"#).unwrap();
        assert!(path.ends_with("gmgn_rank_20260830.json"));
        assert_eq!(std::fs::read(&path).unwrap(), br#"{"data":[]}"#);
    }

    #[test]
    fn test_persist_raw_overwrites_same_day_rerun() {
        let dir = tempfile::tempdir().unwrap();
        persist_raw(dir.path(), "20260830", b"first").unwrap();
        let path = persist_raw(dir.path(), "20260830", b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_persist_raw_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let path = persist_raw(&nested, "20260830", b"{}").unwrap();
        assert!(path.exists());
    }
}
