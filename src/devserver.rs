//!
//! collegium development backend
//! -----------------------------
//! Axum server standing in for the three remote parties the access layer talks to:
//!
//! - Identity backend: `/auth/login`, `/auth/refresh` (rotating refresh tokens), `/auth/logout`.
//! - Business backend: `/api/{collection}` with bearer auth and server-side permission
//!   checks (`view_<collection>` to read, `manage_<collection>` to write), evaluated with
//!   the same `permissions::allows` the client uses for presentation.
//! - Remote error sink: `/client-errors`.
//!
//! Everything lives in memory. Integration tests bind it to an ephemeral port.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::identity::Identity;
use crate::permissions::{self, PermissionMap};

pub const DEFAULT_PORT: u16 = 7979;

/// Client error records kept for inspection; the oldest are dropped first.
pub const MAX_CLIENT_ERRORS: usize = 1000;

fn gen_token() -> Result<String, getrandom::Error> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf)?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// A sign-in the development backend accepts.
#[derive(Debug, Clone)]
pub struct DemoUser {
    pub username: String,
    pub password: String,
    pub identity: Identity,
}

impl DemoUser {
    pub fn new(username: &str, password: &str, roles: &[&str], permissions: PermissionMap) -> Self {
        let mut identity = Identity::new(username, permissions);
        identity.display_name = Some(capitalize(username));
        identity.roles = roles.iter().map(|r| r.to_string()).collect();
        Self { username: username.to_string(), password: password.to_string(), identity }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Registrar, bursar, admin and an auditor whose only grant is malformed (`"true"`).
pub fn demo_users() -> Vec<DemoUser> {
    vec![
        DemoUser::new(
            "registrar",
            "registrar",
            &["admissions"],
            PermissionMap::from_pairs([("view_students", true), ("manage_students", true), ("view_attendance", true)]),
        ),
        DemoUser::new(
            "bursar",
            "bursar",
            &["finance"],
            PermissionMap::from_pairs([("view_fees", true), ("manage_fees", true), ("view_students", true)]),
        ),
        DemoUser::new(
            "admin",
            "admin",
            &["admin"],
            [
                "view_students", "manage_students", "view_fees", "manage_fees", "view_attendance",
                "manage_attendance", "view_leave", "manage_leave", "manage_users",
            ]
            .into_iter()
            .map(|k| (k, true))
            .collect(),
        ),
        DemoUser::new("auditor", "auditor", &["quality"], PermissionMap::from_pairs([("view_fees", json!("true"))])),
    ]
}

fn seed_collections() -> HashMap<String, Vec<Value>> {
    let mut m = HashMap::new();
    m.insert("students".to_string(), vec![
        json!({"id": 1, "name": "Asha Raman", "programme": "BSc Physics"}),
        json!({"id": 2, "name": "Tomas Novak", "programme": "BA History"}),
    ]);
    m.insert("fees".to_string(), vec![json!({"id": 1, "student": 1, "amount": 1200, "paid": false})]);
    m.insert("attendance".to_string(), vec![json!({"student": 1, "date": "2026-09-01", "present": true})]);
    m.insert("leave".to_string(), Vec::new());
    m
}

struct AccessGrant {
    user: String,
    expires_at: DateTime<Utc>,
}

struct RefreshGrant {
    user: String,
    /// Access token issued alongside; revoked when this refresh token is used.
    access: String,
}

struct DevInner {
    users: HashMap<String, DemoUser>,
    access: RwLock<HashMap<String, AccessGrant>>,
    /// Rotated on every use.
    refresh: RwLock<HashMap<String, RefreshGrant>>,
    collections: RwLock<HashMap<String, Vec<Value>>>,
    client_errors: RwLock<VecDeque<Value>>,
    access_ttl: chrono::Duration,
    refresh_delay_ms: AtomicU64,
    login_calls: AtomicU64,
    refresh_calls: AtomicU64,
}

/// Shared state injected into all handlers. Cloning shares it.
#[derive(Clone)]
pub struct DevState {
    inner: Arc<DevInner>,
}

impl Default for DevState {
    fn default() -> Self { Self::new(Duration::from_secs(15 * 60)) }
}

impl DevState {
    pub fn new(access_ttl: Duration) -> Self {
        Self::with_users(demo_users(), access_ttl)
    }

    pub fn with_users(users: Vec<DemoUser>, access_ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(access_ttl).unwrap_or_else(|_| chrono::Duration::minutes(15));
        Self {
            inner: Arc::new(DevInner {
                users: users.into_iter().map(|u| (u.username.clone(), u)).collect(),
                access: RwLock::new(HashMap::new()),
                refresh: RwLock::new(HashMap::new()),
                collections: RwLock::new(seed_collections()),
                client_errors: RwLock::new(VecDeque::new()),
                access_ttl: ttl,
                refresh_delay_ms: AtomicU64::new(0),
                login_calls: AtomicU64::new(0),
                refresh_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Invalidate every issued access token; refresh tokens stay valid.
    pub fn expire_all_access_tokens(&self) {
        self.inner.access.write().clear();
    }

    /// Invalidate every refresh token, so the next refresh is rejected.
    pub fn revoke_all_refresh_tokens(&self) {
        self.inner.refresh.write().clear();
    }

    /// Hold each refresh response for `delay`; widens the window for concurrent 401s.
    pub fn set_refresh_delay(&self, delay: Duration) {
        self.inner.refresh_delay_ms.store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn login_calls(&self) -> u64 { self.inner.login_calls.load(Ordering::Relaxed) }

    pub fn refresh_calls(&self) -> u64 { self.inner.refresh_calls.load(Ordering::Relaxed) }

    pub fn client_errors(&self) -> Vec<Value> { self.inner.client_errors.read().iter().cloned().collect() }

    /// Live access grants, expired ones included until the next issue prunes them.
    pub fn access_grants(&self) -> usize { self.inner.access.read().len() }

    fn push_client_error(&self, record: Value) {
        let mut errors = self.inner.client_errors.write();
        if errors.len() >= MAX_CLIENT_ERRORS {
            errors.pop_front();
        }
        errors.push_back(record);
    }

    pub fn collection(&self, name: &str) -> Vec<Value> {
        self.inner.collections.read().get(name).cloned().unwrap_or_default()
    }

    fn issue_pair(&self, username: &str) -> Result<(String, String, DateTime<Utc>), ApiError> {
        let access = gen_token()?;
        let refresh = gen_token()?;
        let now = Utc::now();
        let expires_at = now + self.inner.access_ttl;
        {
            let mut grants = self.inner.access.write();
            grants.retain(|_, g| g.expires_at > now);
            grants.insert(access.clone(), AccessGrant { user: username.to_string(), expires_at });
        }
        self.inner
            .refresh
            .write()
            .insert(refresh.clone(), RefreshGrant { user: username.to_string(), access: access.clone() });
        debug!(target: "collegium::devserver", user = %username, ttl_secs = self.inner.access_ttl.num_seconds(), "issued credential pair");
        Ok((access, refresh, expires_at))
    }

    /// Consume a refresh token, revoking the access token issued with it.
    fn redeem_refresh(&self, token: &str) -> Option<String> {
        let grant = self.inner.refresh.write().remove(token)?;
        self.inner.access.write().remove(&grant.access);
        Some(grant.user)
    }

    fn validate_access(&self, token: &str) -> Option<&DemoUser> {
        let user = {
            let map = self.inner.access.read();
            let grant = map.get(token)?;
            if grant.expires_at <= Utc::now() { return None; }
            grant.user.clone()
        };
        self.inner.users.get(&user)
    }
}

/// JSON error body: `{"status":"error","code":...,"message":...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn unauthorized<S: Into<String>>(msg: S) -> Self {
        Self { status: StatusCode::UNAUTHORIZED, code: "unauthorized", message: msg.into() }
    }

    fn forbidden<S: Into<String>>(msg: S) -> Self {
        Self { status: StatusCode::FORBIDDEN, code: "forbidden", message: msg.into() }
    }

    fn not_found<S: Into<String>>(msg: S) -> Self {
        Self { status: StatusCode::NOT_FOUND, code: "not_found", message: msg.into() }
    }

    fn internal<S: Into<String>>(msg: S) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, code: "internal", message: msg.into() }
    }

    pub fn status(&self) -> StatusCode { self.status }
}

impl From<getrandom::Error> for ApiError {
    fn from(e: getrandom::Error) -> Self {
        warn!(target: "collegium::devserver", "token generation failed: {}", e);
        Self::internal("could not generate credentials")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"status": "error", "code": self.code, "message": self.message}))).into_response()
    }
}

/// Server-side counterpart of the client gate: same evaluator, same keys.
pub fn require_permission(map: &PermissionMap, key: &str) -> Result<(), ApiError> {
    permissions::require(map, key).map_err(|denied| ApiError::forbidden(denied.to_string()))
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get("authorization")?.to_str().ok()?;
    raw.strip_prefix("Bearer ").or_else(|| raw.strip_prefix("bearer ")).map(str::trim)
}

fn authenticate<'a>(state: &'a DevState, headers: &HeaderMap) -> Result<&'a DemoUser, ApiError> {
    let token = bearer(headers).ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
    state.validate_access(token).ok_or_else(|| ApiError::unauthorized("access token expired or unknown"))
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
    refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogoutPayload {
    #[serde(default)]
    refresh_token: Option<String>,
}

async fn login(State(state): State<DevState>, Json(payload): Json<LoginPayload>) -> Result<Json<Value>, ApiError> {
    state.inner.login_calls.fetch_add(1, Ordering::Relaxed);
    let user = match state.inner.users.get(&payload.username) {
        Some(u) if u.password == payload.password => u,
        _ => {
            info!(target: "collegium::devserver", user = %payload.username, "login rejected");
            return Err(ApiError::unauthorized("invalid username or password"));
        }
    };
    let (access, refresh, expires_at) = state.issue_pair(&user.username)?;
    info!(target: "collegium::devserver", user = %user.username, "login");
    Ok(Json(json!({
        "accessToken": access,
        "refreshToken": refresh,
        "expiresAt": expires_at,
        "user": user.identity,
    })))
}

async fn refresh(State(state): State<DevState>, Json(payload): Json<RefreshPayload>) -> Result<Json<Value>, ApiError> {
    state.inner.refresh_calls.fetch_add(1, Ordering::Relaxed);
    let delay = state.inner.refresh_delay_ms.load(Ordering::Relaxed);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let Some(user) = state.redeem_refresh(&payload.refresh_token) else {
        debug!(target: "collegium::devserver", "refresh with unknown or rotated token");
        return Err(ApiError::unauthorized("refresh token expired or unknown"));
    };
    let (access, refresh, expires_at) = state.issue_pair(&user)?;
    debug!(target: "collegium::devserver", user = %user, "refresh");
    Ok(Json(json!({"accessToken": access, "refreshToken": refresh, "expiresAt": expires_at})))
}

async fn logout(State(state): State<DevState>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    if let Some(token) = bearer(&headers) {
        state.inner.access.write().remove(token);
    }
    let payload: LogoutPayload = serde_json::from_slice(&body).unwrap_or_default();
    if let Some(rt) = payload.refresh_token {
        state.inner.refresh.write().remove(&rt);
    }
    Json(json!({"status": "ok"}))
}

async fn list_collection(
    State(state): State<DevState>,
    headers: HeaderMap,
    Path(collection): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let map = state.inner.collections.read();
    let items = map.get(&collection).ok_or_else(|| ApiError::not_found(format!("no collection '{}'", collection)))?;
    require_permission(&user.identity.permissions, &format!("view_{}", collection))?;
    Ok(Json(json!({"status": "ok", "items": items})))
}

async fn append_collection(
    State(state): State<DevState>,
    headers: HeaderMap,
    Path(collection): Path<String>,
    Json(item): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let user = authenticate(&state, &headers)?;
    let mut map = state.inner.collections.write();
    let items = map.get_mut(&collection).ok_or_else(|| ApiError::not_found(format!("no collection '{}'", collection)))?;
    require_permission(&user.identity.permissions, &format!("manage_{}", collection))?;
    items.push(item.clone());
    info!(target: "collegium::devserver", user = %user.username, collection = %collection, "item added");
    Ok((StatusCode::CREATED, Json(json!({"status": "ok", "item": item}))))
}

async fn receive_client_error(State(state): State<DevState>, Json(record): Json<Value>) -> impl IntoResponse {
    warn!(
        target: "collegium::devserver",
        url = record.get("url").and_then(|v| v.as_str()).unwrap_or(""),
        "client error: {}",
        record.get("message").and_then(|v| v.as_str()).unwrap_or("<no message>")
    );
    state.push_client_error(record);
    StatusCode::NO_CONTENT
}

async fn list_client_errors(State(state): State<DevState>) -> Json<Value> {
    Json(json!({"status": "ok", "items": state.client_errors()}))
}

pub fn router(state: DevState) -> Router {
    Router::new()
        .route("/health", get(|| async { "collegium devserver ok" }))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/api/{collection}", get(list_collection).post(append_collection))
        .route("/client-errors", post(receive_client_error).get(list_client_errors))
        .with_state(state)
}

/// Serve on `0.0.0.0:port` until the process ends.
pub async fn run_with_port(port: u16, state: DevState) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    info!(target: "collegium::devserver", "Starting development backend on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Bind `127.0.0.1:0` and serve in the background. Returns the bound address.
pub async fn spawn_ephemeral(state: DevState) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.context("binding ephemeral port")?;
    let addr = listener.local_addr()?;
    let app = router(state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(target: "collegium::devserver", "development backend stopped: {}", e);
        }
    });
    Ok((addr, handle))
}
