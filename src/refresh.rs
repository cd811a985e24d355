//! Credential refresher with request coalescing.
//!
//! Any number of callers that need a fresh credential while a refresh is already in
//! flight await that same refresh; the identity backend sees one call. The pending
//! handle is created on first demand and removed by the refresh itself once it settles,
//! so the next expiry starts a new one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::identity::{Credential, SessionStore};

/// Identity backend call that trades a refresh token for a new credential pair.
/// Any failure (rejection or transport) must come back as `AuthError::ReauthRequired`.
#[async_trait]
pub trait RefreshBackend: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, AuthError>;
}

type SharedRefresh = Shared<BoxFuture<'static, Result<Arc<Credential>, AuthError>>>;

struct InFlight {
    id: u64,
    pending: SharedRefresh,
}

struct Inner {
    store: SessionStore,
    backend: Arc<dyn RefreshBackend>,
    in_flight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
    backend_calls: AtomicU64,
}

#[derive(Clone)]
pub struct Refresher {
    inner: Arc<Inner>,
}

impl Refresher {
    pub fn new(store: SessionStore, backend: Arc<dyn RefreshBackend>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                backend,
                in_flight: Mutex::new(None),
                next_id: AtomicU64::new(1),
                backend_calls: AtomicU64::new(0),
            }),
        }
    }

    pub fn session(&self) -> &SessionStore { &self.inner.store }

    /// Number of refresh calls actually sent to the identity backend.
    pub fn backend_calls(&self) -> u64 {
        self.inner.backend_calls.load(Ordering::SeqCst)
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Refresh the stored credential, joining an in-flight refresh if there is one.
    pub async fn refresh(&self) -> Result<Arc<Credential>, AuthError> {
        let pending = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref().map(|f| (f.id, f.pending.clone())) {
                Some((id, pending)) => {
                    debug!(target: "collegium::refresh", id, "joining in-flight refresh");
                    pending
                }
                None => self.start_locked(&mut slot),
            }
        };
        pending.await
    }

    /// Refresh after `rejected_access_token` was answered with 401.
    ///
    /// If the store already holds a different credential, another operation refreshed in
    /// the meantime and that credential is returned without a backend call.
    pub async fn refresh_rejected(&self, rejected_access_token: &str) -> Result<Arc<Credential>, AuthError> {
        let pending = {
            let mut slot = self.inner.in_flight.lock();
            if let Some((id, pending)) = slot.as_ref().map(|f| (f.id, f.pending.clone())) {
                debug!(target: "collegium::refresh", id, "joining in-flight refresh");
                pending
            } else {
                match self.inner.store.current() {
                    None => {
                        return Err(AuthError::ReauthRequired("session ended while the request was in flight".into()));
                    }
                    Some(current) if current.access_token != rejected_access_token => {
                        debug!(target: "collegium::refresh", "credential already replaced; reusing it");
                        return Ok(current);
                    }
                    Some(_) => self.start_locked(&mut slot),
                }
            }
        };
        pending.await
    }

    fn start_locked(&self, slot: &mut Option<InFlight>) -> SharedRefresh {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let store = self.inner.store.clone();
        let backend = self.inner.backend.clone();
        let owner: Weak<Inner> = Arc::downgrade(&self.inner);
        let pending = async move {
            let result = match owner.upgrade() {
                Some(inner) => run_refresh(&store, backend.as_ref(), &inner.backend_calls).await,
                None => Err(AuthError::ReauthRequired("refresher dropped".into())),
            };
            if let Some(inner) = owner.upgrade() {
                let mut guard = inner.in_flight.lock();
                if guard.as_ref().map(|f| f.id) == Some(id) {
                    *guard = None;
                }
            }
            result
        }
        .boxed()
        .shared();
        *slot = Some(InFlight { id, pending: pending.clone() });
        debug!(target: "collegium::refresh", id, "started refresh");
        pending
    }
}

async fn run_refresh(store: &SessionStore, backend: &dyn RefreshBackend, calls: &AtomicU64) -> Result<Arc<Credential>, AuthError> {
    let epoch = store.epoch();
    let Some(current) = store.current() else {
        return Err(AuthError::NoSession);
    };
    info!(target: "collegium::refresh", "refreshing access credential");
    calls.fetch_add(1, Ordering::SeqCst);
    match backend.refresh(&current.refresh_token).await {
        Ok(fresh) => {
            let fresh = Arc::new(fresh);
            if store.replace_if_epoch(epoch, fresh.clone()) {
                info!(target: "collegium::refresh", expires_at = %fresh.expires_at, "credential refreshed");
                Ok(fresh)
            } else {
                warn!(target: "collegium::refresh", "session changed during refresh; discarding new credential");
                superseded(store)
            }
        }
        Err(e) => {
            if !store.clear_if_epoch(epoch) {
                debug!(target: "collegium::refresh", "refresh failed for a credential that was already replaced: {}", e);
                return superseded(store);
            }
            warn!(target: "collegium::refresh", "refresh failed, ending session: {}", e);
            Err(match e {
                AuthError::NoSession => AuthError::ReauthRequired("identity backend reported no session".into()),
                other => other,
            })
        }
    }
}

/// Outcome for a refresh whose starting credential was replaced or removed meanwhile.
fn superseded(store: &SessionStore) -> Result<Arc<Credential>, AuthError> {
    store.current().ok_or(AuthError::NoSession)
}
