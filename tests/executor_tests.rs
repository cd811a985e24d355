use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use collegium::error::TransportError;
use collegium::identity::{IdentityClient, MemorySessionPersistence};
use collegium::transport::{HttpTransport, WireRequest, WireResponse};
use collegium::{
    AccessConfig, Credential, Executor, FailureKind, Identity, Operation, PermissionMap, Refresher, RequestOutcome,
    SessionStore,
};

/// Scripted identity + business backend behind the transport seam.
#[derive(Default)]
struct FakeBackend {
    /// Access tokens the business side accepts.
    valid: Mutex<HashSet<String>>,
    /// refresh token -> (new access, new refresh)
    rotations: Mutex<HashMap<String, (String, String)>>,
    business_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    seen_bearers: Mutex<Vec<Option<String>>>,
    /// When set, refresh responses wait for a permit.
    refresh_gate: Option<Arc<Semaphore>>,
    /// Business side rejects every token, fresh ones included.
    reject_everything: AtomicBool,
    /// Business side answers with this instead of checking tokens.
    fixed: Mutex<Option<(u16, Value)>>,
    time_out: AtomicBool,
}

impl FakeBackend {
    fn accept(&self, token: &str) {
        self.valid.lock().insert(token.to_string());
    }

    fn rotate(&self, refresh: &str, new_access: &str, new_refresh: &str) {
        self.rotations.lock().insert(refresh.to_string(), (new_access.to_string(), new_refresh.to_string()));
    }
}

#[async_trait]
impl HttpTransport for FakeBackend {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        if request.url.ends_with("/auth/refresh") {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.refresh_gate {
                let _permit = gate.acquire().await.map_err(|_| TransportError::Cancelled)?;
            }
            let token = request.body.as_ref().and_then(|b| b["refreshToken"].as_str()).unwrap_or("").to_string();
            let rotated = self.rotations.lock().remove(&token);
            return Ok(match rotated {
                Some((access, refresh)) => {
                    self.accept(&access);
                    WireResponse::json(200, &json!({
                        "accessToken": access, "refreshToken": refresh, "expiresAt": "2030-01-01T00:00:00Z"
                    }))
                }
                None => WireResponse::json(401, &json!({"message": "refresh token expired"})),
            });
        }
        self.business_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_bearers.lock().push(request.bearer.clone());
        if self.time_out.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout("deadline elapsed".into()));
        }
        if let Some((status, body)) = self.fixed.lock().clone() {
            return Ok(WireResponse::json(status, &body));
        }
        let ok = request.bearer.as_deref().map(|b| self.valid.lock().contains(b)).unwrap_or(false);
        if ok && !self.reject_everything.load(Ordering::SeqCst) {
            Ok(WireResponse::json(200, &json!({"items": [{"id": 1}], "servedWith": request.bearer})))
        } else {
            Ok(WireResponse::json(401, &json!({"message": "token expired"})))
        }
    }
}

fn wire(backend: Arc<FakeBackend>) -> (Executor, SessionStore) {
    let cfg = AccessConfig::default();
    let session = SessionStore::new(Arc::new(MemorySessionPersistence::new()));
    let identity = Arc::new(IdentityClient::new(backend.clone(), &cfg).unwrap());
    let refresher = Refresher::new(session.clone(), identity);
    (Executor::new(backend, refresher, cfg.api_base_url.clone()), session)
}

fn sign_in(session: &SessionStore, access: &str, refresh: &str, grants: &[&str]) {
    let perms: PermissionMap = grants.iter().map(|k| (*k, true)).collect();
    session.login(Credential::new(access, refresh, Utc::now()), Identity::new("bursar", perms));
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_retried_once() {
    let backend = Arc::new(FakeBackend::default());
    backend.rotate("R1", "A2", "R2");
    let (exec, session) = wire(backend.clone());
    sign_in(&session, "A1", "R1", &[]);

    let outcome = exec.execute(Operation::get("/api/fees")).await;

    assert_eq!(outcome.clone().into_result().unwrap()["servedWith"], "A2");
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.business_calls.load(Ordering::SeqCst), 2);
    assert_eq!(*backend.seen_bearers.lock(), vec![Some("A1".to_string()), Some("A2".to_string())]);
    let current = session.current().unwrap();
    assert_eq!(current.access_token, "A2");
    assert_eq!(current.refresh_token, "R2");
}

#[tokio::test]
async fn second_rejection_is_final() {
    let backend = Arc::new(FakeBackend::default());
    backend.rotate("R1", "A2", "R2");
    backend.reject_everything.store(true, Ordering::SeqCst);
    let (exec, session) = wire(backend.clone());
    sign_in(&session, "A1", "R1", &[]);

    let outcome = exec.execute(Operation::post("/api/fees", json!({"amount": 10}))).await;

    assert_eq!(outcome.failure_kind(), Some(FailureKind::ReauthRequired));
    assert_eq!(backend.business_calls.load(Ordering::SeqCst), 2);
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(session.current().is_none());
}

#[tokio::test]
async fn no_session_sends_nothing() {
    let backend = Arc::new(FakeBackend::default());
    let (exec, _session) = wire(backend.clone());

    let outcome = exec.execute(Operation::get("/api/fees")).await;

    assert_eq!(outcome.failure_kind(), Some(FailureKind::NoSession));
    assert_eq!(backend.business_calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_permission_is_denied_before_sending() {
    let backend = Arc::new(FakeBackend::default());
    backend.accept("A1");
    let (exec, session) = wire(backend.clone());
    sign_in(&session, "A1", "R1", &["view_fees"]);

    let denied = exec.execute(Operation::post("/api/fees", json!({})).requires("manage_fees")).await;
    assert_eq!(denied.failure_kind(), Some(FailureKind::AuthorizationDenied));
    assert_eq!(backend.business_calls.load(Ordering::SeqCst), 0);

    let allowed = exec.execute(Operation::get("/api/fees").requires("view_fees")).await;
    assert!(allowed.is_success());
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() {
    const N: usize = 6;
    let gate = Arc::new(Semaphore::new(0));
    let backend = Arc::new(FakeBackend { refresh_gate: Some(gate.clone()), ..Default::default() });
    backend.rotate("R1", "A2", "R2");
    let (exec, session) = wire(backend.clone());
    sign_in(&session, "A1", "R1", &[]);

    let tasks: Vec<_> = (0..N)
        .map(|_| {
            let exec = exec.clone();
            tokio::spawn(async move { exec.execute(Operation::get("/api/fees")).await })
        })
        .collect();

    tokio::time::timeout(Duration::from_secs(5), async {
        while backend.business_calls.load(Ordering::SeqCst) < N || !exec.refresher().is_refreshing() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("all requests should hit 401 while the refresh is held");
    gate.add_permits(N);

    for t in tasks {
        let outcome = t.await.unwrap();
        assert_eq!(outcome.into_result().unwrap()["servedWith"], "A2");
    }
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(exec.refresher().backend_calls(), 1);
    assert_eq!(backend.business_calls.load(Ordering::SeqCst), 2 * N);
    assert_eq!(session.current().unwrap().access_token, "A2");
}

#[tokio::test]
async fn rejected_refresh_token_ends_session() {
    let backend = Arc::new(FakeBackend::default());
    let (exec, session) = wire(backend.clone());
    sign_in(&session, "A1", "R-expired", &[]);

    let outcome = exec.execute(Operation::get("/api/fees")).await;

    assert_eq!(outcome.failure_kind(), Some(FailureKind::ReauthRequired));
    assert!(session.current().is_none());
    assert!(session.identity().is_none());
    assert_eq!(backend.business_calls.load(Ordering::SeqCst), 1);

    let after = exec.execute(Operation::get("/api/fees")).await;
    assert_eq!(after.failure_kind(), Some(FailureKind::NoSession));
    assert_eq!(backend.business_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn non_auth_failures_are_not_retried() {
    let backend = Arc::new(FakeBackend::default());
    let (exec, session) = wire(backend.clone());
    sign_in(&session, "A1", "R1", &[]);

    *backend.fixed.lock() = Some((403, json!({"message": "finance only"})));
    let forbidden = exec.execute(Operation::get("/api/fees")).await;
    assert_eq!(forbidden, RequestOutcome::Failure(collegium::Failure::denied("finance only")));

    *backend.fixed.lock() = Some((500, json!({"error": "db down"})));
    let broken = exec.execute(Operation::get("/api/fees")).await.into_result().unwrap_err();
    assert_eq!(broken.kind, FailureKind::ApplicationError);
    assert_eq!(broken.message, "HTTP 500: db down");

    *backend.fixed.lock() = None;
    backend.time_out.store(true, Ordering::SeqCst);
    let timed_out = exec.execute(Operation::post("/api/fees", json!({"amount": 5}))).await;
    assert_eq!(timed_out.failure_kind(), Some(FailureKind::TransportError));

    assert_eq!(backend.business_calls.load(Ordering::SeqCst), 3);
    assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
    assert_eq!(session.current().unwrap().access_token, "A1");
}

#[tokio::test]
async fn logout_during_refresh_is_not_undone() {
    let gate = Arc::new(Semaphore::new(0));
    let backend = Arc::new(FakeBackend { refresh_gate: Some(gate.clone()), ..Default::default() });
    backend.rotate("R1", "A2", "R2");
    let (exec, session) = wire(backend.clone());
    sign_in(&session, "A1", "R1", &[]);

    let task = {
        let exec = exec.clone();
        tokio::spawn(async move { exec.execute(Operation::get("/api/fees")).await })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while !exec.refresher().is_refreshing() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    session.clear();
    gate.add_permits(1);

    let outcome = task.await.unwrap();
    assert!(!outcome.is_success());
    assert!(session.current().is_none());
}

#[tokio::test]
async fn typed_results_decode_the_payload() {
    #[derive(serde::Deserialize)]
    struct Listing {
        items: Vec<Value>,
    }
    let backend = Arc::new(FakeBackend::default());
    backend.accept("A1");
    let (exec, session) = wire(backend);
    sign_in(&session, "A1", "R1", &[]);

    let listing: Listing = exec.execute_as(Operation::get("/api/fees")).await.unwrap();
    assert_eq!(listing.items.len(), 1);
    let wrong = exec.execute_as::<Vec<u32>>(Operation::get("/api/fees")).await.unwrap_err();
    assert_eq!(wrong.kind, FailureKind::ApplicationError);
}
