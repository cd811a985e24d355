//! Application-facing facade. Builds every component from one `AccessConfig` and
//! shares a single session store between them.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use crate::boundary::{BoundaryView, ErrorBoundary};
use crate::config::AccessConfig;
use crate::executor::{Executor, Operation, RequestOutcome};
use crate::identity::{
    FileSessionPersistence, Identity, IdentityClient, LoginError, LoginRequest, MemorySessionPersistence,
    SessionPersistence, SessionStore,
};
use crate::refresh::Refresher;
use crate::reporter::{DiagnosticCache, ErrorReporter, FileDiagnosticCache, HttpErrorSink, MemoryDiagnosticCache};
use crate::transport::{HttpTransport, ReqwestTransport};

#[derive(Clone)]
pub struct AccessClient {
    config: AccessConfig,
    session: SessionStore,
    identity: Arc<IdentityClient>,
    executor: Executor,
    boundary: ErrorBoundary,
}

impl AccessClient {
    /// Production wiring: reqwest transport, file-backed stores when configured, and the
    /// HTTP error sink. A persisted session is hydrated immediately.
    pub fn from_config(config: &AccessConfig) -> Result<Self> {
        let transport: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::new(config.request_timeout()).context("building http transport")?);
        let persistence: Arc<dyn SessionPersistence> = match &config.session_file {
            Some(path) => Arc::new(FileSessionPersistence::new(path.clone())),
            None => Arc::new(MemorySessionPersistence::new()),
        };
        let cache: Arc<dyn DiagnosticCache> = match &config.diagnostics_dir {
            Some(dir) => Arc::new(FileDiagnosticCache::new(dir.clone())),
            None => Arc::new(MemoryDiagnosticCache::new()),
        };
        let sink = HttpErrorSink::new(config.logging_endpoint.clone(), config.request_timeout())
            .context("building error sink")?;
        let reporter = ErrorReporter::new(cache, config.app_url.clone())
            .with_sink(Arc::new(sink), config.remote_logging_enabled);
        let client = Self::from_parts(config, transport, persistence, reporter)?;
        if client.session.hydrate() {
            info!(target: "collegium::session", user = ?client.session.user_ref(), "resumed persisted session");
        }
        Ok(client)
    }

    /// Wire the components around caller-supplied seams. Does not hydrate.
    pub fn from_parts(
        config: &AccessConfig,
        transport: Arc<dyn HttpTransport>,
        persistence: Arc<dyn SessionPersistence>,
        reporter: ErrorReporter,
    ) -> Result<Self> {
        let session = SessionStore::new(persistence);
        let identity = Arc::new(IdentityClient::new(transport.clone(), config).context("resolving identity endpoints")?);
        let refresher = Refresher::new(session.clone(), identity.clone());
        let executor = Executor::new(transport, refresher, config.api_base_url.clone());
        let boundary = ErrorBoundary::from_config(reporter.with_session(session.clone()), config);
        Ok(Self { config: config.clone(), session, identity, executor, boundary })
    }

    /// Authenticate and start a new session, replacing any previous one.
    pub async fn login(&self, username: &str, password: &str) -> Result<Arc<Identity>, LoginError> {
        let req = LoginRequest { username: username.to_string(), password: password.to_string() };
        let resp = self.identity.login(&req).await?;
        self.session.login(resp.credential, resp.user);
        self.session.identity().ok_or(LoginError::Malformed("session ended during login".into()))
    }

    /// Ends the local session first; the backend revocation is best-effort.
    pub async fn logout(&self) {
        let Some(credential) = self.session.current() else { return };
        self.session.clear();
        self.identity.logout(&credential).await;
    }

    pub async fn execute(&self, op: Operation) -> RequestOutcome {
        self.executor.execute(op).await
    }

    /// Execute and pass the outcome through the error boundary for `route`.
    pub async fn execute_guarded(&self, op: Operation, route: &str) -> BoundaryView<Value> {
        let outcome = self.executor.execute(op).await;
        self.boundary.resolve(outcome, route)
    }

    pub fn config(&self) -> &AccessConfig { &self.config }
    pub fn session(&self) -> &SessionStore { &self.session }
    pub fn executor(&self) -> &Executor { &self.executor }
    pub fn refresher(&self) -> &Refresher { self.executor.refresher() }
    pub fn boundary(&self) -> &ErrorBoundary { &self.boundary }
    pub fn reporter(&self) -> &ErrorReporter { self.boundary.reporter() }
}
