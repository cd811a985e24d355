use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::credential::Credential;
use super::persistence::{MemorySessionPersistence, PersistedSession, SessionPersistence};
use super::principal::Identity;
use crate::permissions::{self, PermissionMap};

#[derive(Default)]
struct Slot {
    credential: Option<Arc<Credential>>,
    identity: Option<Arc<Identity>>,
    /// Advanced whenever the credential is installed or removed from outside the refresher,
    /// so a late refresh can tell that the credential it started from is gone.
    epoch: u64,
}

struct Inner {
    slot: RwLock<Slot>,
    persistence: Arc<dyn SessionPersistence>,
}

/// Holder of the current credential and identity. Cloning shares the same slot.
///
/// The credential is swapped as a whole `Arc`, so readers never see a partially
/// written value. The durable copy is written while the slot lock is held, which
/// keeps it in the same order as the in-memory replacements.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl Default for SessionStore {
    fn default() -> Self { Self::in_memory() }
}

impl SessionStore {
    pub fn new(persistence: Arc<dyn SessionPersistence>) -> Self {
        Self { inner: Arc::new(Inner { slot: RwLock::new(Slot::default()), persistence }) }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionPersistence::new()))
    }

    /// Load the persisted session, if any. Returns true when a credential was restored.
    pub fn hydrate(&self) -> bool {
        match self.inner.persistence.load() {
            Ok(Some(saved)) => {
                let mut slot = self.inner.slot.write();
                slot.credential = Some(Arc::new(saved.credential));
                slot.identity = saved.identity.map(Arc::new);
                slot.epoch += 1;
                debug!(target: "collegium::session", "session restored from durable storage");
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(target: "collegium::session", "ignoring unreadable persisted session: {:#}", e);
                false
            }
        }
    }

    pub fn current(&self) -> Option<Arc<Credential>> {
        self.inner.slot.read().credential.clone()
    }

    pub fn identity(&self) -> Option<Arc<Identity>> {
        self.inner.slot.read().identity.clone()
    }

    /// Permission map of the signed-in identity; empty (deny everything) when signed out.
    pub fn permissions(&self) -> PermissionMap {
        self.identity().map(|i| i.permissions.clone()).unwrap_or_default()
    }

    pub fn allows(&self, key: &str) -> bool {
        match self.identity() {
            Some(identity) => permissions::allows(&identity.permissions, key),
            None => false,
        }
    }

    pub fn user_ref(&self) -> Option<String> {
        self.identity().map(|i| i.user_id.clone())
    }

    /// Replace the credential, keeping the identity.
    pub fn set(&self, credential: Credential) {
        let mut slot = self.inner.slot.write();
        slot.credential = Some(Arc::new(credential));
        slot.epoch += 1;
        self.persist_locked(&slot);
    }

    /// Start a new session: credential and identity replaced together.
    pub fn login(&self, credential: Credential, identity: Identity) {
        let mut slot = self.inner.slot.write();
        slot.credential = Some(Arc::new(credential));
        slot.identity = Some(Arc::new(identity));
        slot.epoch += 1;
        self.persist_locked(&slot);
    }

    pub fn clear(&self) {
        let mut slot = self.inner.slot.write();
        self.clear_locked(&mut slot);
    }

    pub fn epoch(&self) -> u64 {
        self.inner.slot.read().epoch
    }

    /// Store a refreshed credential only if the slot was not touched since `epoch` was read.
    pub(crate) fn replace_if_epoch(&self, epoch: u64, credential: Arc<Credential>) -> bool {
        let mut slot = self.inner.slot.write();
        if slot.epoch != epoch { return false; }
        slot.credential = Some(credential);
        self.persist_locked(&slot);
        true
    }

    /// Clear only if the slot was not touched since `epoch` was read.
    pub(crate) fn clear_if_epoch(&self, epoch: u64) -> bool {
        let mut slot = self.inner.slot.write();
        if slot.epoch != epoch { return false; }
        self.clear_locked(&mut slot);
        true
    }

    /// Clear only if `access_token` is still the current one.
    pub(crate) fn clear_if_current(&self, access_token: &str) -> bool {
        let mut slot = self.inner.slot.write();
        let still_current = slot.credential.as_ref().map(|c| c.access_token == access_token).unwrap_or(false);
        if still_current { self.clear_locked(&mut slot); }
        still_current
    }

    fn clear_locked(&self, slot: &mut Slot) {
        slot.credential = None;
        slot.identity = None;
        slot.epoch += 1;
        if let Err(e) = self.inner.persistence.clear() {
            warn!(target: "collegium::session", "failed to clear persisted session: {:#}", e);
        }
    }

    fn persist_locked(&self, slot: &Slot) {
        let Some(credential) = slot.credential.as_ref() else { return; };
        let saved = PersistedSession {
            credential: Credential::clone(credential),
            identity: slot.identity.as_ref().map(|i| Identity::clone(i)),
        };
        if let Err(e) = self.inner.persistence.save(&saved) {
            warn!(target: "collegium::session", "failed to persist session: {:#}", e);
        }
    }
}
