//! Single-slot local diagnostic cache.

use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use super::record::DiagnosticEntry;

pub const LAST_CLIENT_ERROR_KEY: &str = "last_client_error";

pub trait DiagnosticCache: Send + Sync {
    /// Overwrites whatever was stored before.
    fn store(&self, entry: &DiagnosticEntry) -> Result<()>;
    fn last(&self) -> Result<Option<DiagnosticEntry>>;
}

#[derive(Default)]
pub struct MemoryDiagnosticCache {
    slot: Mutex<Option<DiagnosticEntry>>,
}

impl MemoryDiagnosticCache {
    pub fn new() -> Self { Self::default() }
}

impl DiagnosticCache for MemoryDiagnosticCache {
    fn store(&self, entry: &DiagnosticEntry) -> Result<()> {
        *self.slot.lock() = Some(entry.clone());
        Ok(())
    }

    fn last(&self) -> Result<Option<DiagnosticEntry>> {
        Ok(self.slot.lock().clone())
    }
}

fn sanitize_filename(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// One JSON file per key under `dir`; only [`LAST_CLIENT_ERROR_KEY`] is used.
pub struct FileDiagnosticCache {
    dir: PathBuf,
}

impl FileDiagnosticCache {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_filename(LAST_CLIENT_ERROR_KEY)))
    }
}

impl DiagnosticCache for FileDiagnosticCache {
    fn store(&self, entry: &DiagnosticEntry) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating diagnostics dir {}", self.dir.display()))?;
        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(entry)?).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    fn last(&self) -> Result<Option<DiagnosticEntry>> {
        let path = self.path();
        if !path.exists() { return Ok(None); }
        let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        Ok(Some(serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(msg: &str) -> DiagnosticEntry {
        DiagnosticEntry { message: msg.into(), url: "collegium://app/fees".into(), timestamp: "2026-03-01T10:00:00.000Z".into() }
    }

    #[test]
    fn memory_cache_keeps_only_latest() {
        let cache = MemoryDiagnosticCache::new();
        assert!(cache.last().unwrap().is_none());
        cache.store(&entry("first")).unwrap();
        cache.store(&entry("second")).unwrap();
        assert_eq!(cache.last().unwrap().unwrap().message, "second");
    }

    #[test]
    fn file_cache_overwrites_single_slot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileDiagnosticCache::new(dir.path().join("diag"));
        assert!(cache.last().unwrap().is_none());
        cache.store(&entry("first")).unwrap();
        cache.store(&entry("second")).unwrap();
        assert_eq!(cache.last().unwrap().unwrap(), entry("second"));
        assert!(cache.path().ends_with("last_client_error.json"));
        let files = std::fs::read_dir(dir.path().join("diag")).unwrap().count();
        assert_eq!(files, 1);
    }
}
