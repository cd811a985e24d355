//! Durable side-channel for the session store. Only the store touches it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::credential::Credential;
use super::principal::Identity;

/// What survives a restart: the credential and the identity it was issued for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub credential: Credential,
    #[serde(default)]
    pub identity: Option<Identity>,
}

pub trait SessionPersistence: Send + Sync {
    fn load(&self) -> Result<Option<PersistedSession>>;
    fn save(&self, session: &PersistedSession) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// JSON file written atomically (temp file + rename).
pub struct FileSessionPersistence {
    path: PathBuf,
}

impl FileSessionPersistence {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl SessionPersistence for FileSessionPersistence {
    fn load(&self) -> Result<Option<PersistedSession>> {
        if !self.path.exists() { return Ok(None); }
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("reading session file {}", self.path.display()))?;
        let session = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing session file {}", self.path.display()))?;
        Ok(Some(session))
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(session)?;
        std::fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}

/// Keeps the "durable" copy in memory; for tests and processes that must not write to disk.
#[derive(Default)]
pub struct MemorySessionPersistence {
    slot: Mutex<Option<PersistedSession>>,
}

impl MemorySessionPersistence {
    pub fn new() -> Self { Self::default() }

    pub fn with_session(session: PersistedSession) -> Self {
        Self { slot: Mutex::new(Some(session)) }
    }
}

impl SessionPersistence for MemorySessionPersistence {
    fn load(&self) -> Result<Option<PersistedSession>> { Ok(self.slot.lock().clone()) }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        *self.slot.lock() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> PersistedSession {
        PersistedSession { credential: Credential::new("A1", "R1", Utc::now()), identity: Some(Identity::new("registrar", Default::default())) }
    }

    #[test]
    fn file_persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let p = FileSessionPersistence::new(&path);
        assert!(p.load().unwrap().is_none());
        let saved = sample();
        p.save(&saved).unwrap();

        let reopened = FileSessionPersistence::new(&path);
        assert_eq!(reopened.load().unwrap(), Some(saved));

        reopened.clear().unwrap();
        assert!(reopened.load().unwrap().is_none());
        // clearing twice is fine
        reopened.clear().unwrap();
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(FileSessionPersistence::new(&path).load().is_err());
    }
}
