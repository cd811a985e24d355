//! Client error capture.
//!
//! `capture` never returns an error and never panics into the caller. Every record is
//! written to the single-slot diagnostic cache first, so the latest failure stays
//! inspectable even when the remote sink is down or disabled.

mod cache;
mod record;
mod sink;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use cache::{DiagnosticCache, FileDiagnosticCache, MemoryDiagnosticCache, LAST_CLIENT_ERROR_KEY};
pub use record::{DiagnosticEntry, ErrorInput, ErrorRecord, Level, MAX_DIAGNOSTIC_MESSAGE};
pub use sink::{DeliveryMode, ErrorSink, HttpErrorSink};

use crate::error::SinkError;
use crate::identity::SessionStore;

/// One capture call. Only `error` is required.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub error: ErrorInput,
    pub context_info: Option<Value>,
    pub level: Level,
    /// Where the failure happened; a leading `/` is resolved against the app url.
    pub url: Option<String>,
    pub delivery: DeliveryMode,
}

impl CaptureRequest {
    pub fn new<E: Into<ErrorInput>>(error: E) -> Self {
        Self { error: error.into(), context_info: None, level: Level::Error, url: None, delivery: DeliveryMode::Regular }
    }

    pub fn context(mut self, info: Value) -> Self {
        self.context_info = Some(info);
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn unloading(mut self) -> Self {
        self.delivery = DeliveryMode::Unload;
        self
    }
}

/// Counters and outstanding deliveries, shared by every reporter derived from the same `new`.
#[derive(Default)]
struct Tracking {
    captured: AtomicU64,
    failures: AtomicU64,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    cache: Arc<dyn DiagnosticCache>,
    sink: Option<Arc<dyn ErrorSink>>,
    remote_enabled: bool,
    app_url: String,
    session: Option<SessionStore>,
    tracking: Arc<Tracking>,
}

#[derive(Clone)]
pub struct ErrorReporter {
    inner: Arc<Inner>,
}

impl ErrorReporter {
    pub fn new<S: Into<String>>(cache: Arc<dyn DiagnosticCache>, app_url: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                sink: None,
                remote_enabled: false,
                app_url: app_url.into(),
                session: None,
                tracking: Arc::new(Tracking::default()),
            }),
        }
    }

    /// Cache-only reporter; nothing leaves the process.
    pub fn local(app_url: &str) -> Self {
        Self::new(Arc::new(MemoryDiagnosticCache::new()), app_url)
    }

    /// Attach a remote sink. `enabled = false` keeps it configured but never called.
    pub fn with_sink(self, sink: Arc<dyn ErrorSink>, enabled: bool) -> Self {
        self.rebuild(|inner| {
            inner.sink = Some(sink);
            inner.remote_enabled = enabled;
        })
    }

    /// Records carry the signed-in user's id while a session exists.
    pub fn with_session(self, session: SessionStore) -> Self {
        self.rebuild(|inner| inner.session = Some(session))
    }

    fn rebuild<F: FnOnce(&mut Inner)>(self, f: F) -> Self {
        let old = &self.inner;
        let mut inner = Inner {
            cache: old.cache.clone(),
            sink: old.sink.clone(),
            remote_enabled: old.remote_enabled,
            app_url: old.app_url.clone(),
            session: old.session.clone(),
            tracking: old.tracking.clone(),
        };
        f(&mut inner);
        Self { inner: Arc::new(inner) }
    }

    pub fn remote_enabled(&self) -> bool {
        self.inner.remote_enabled && self.inner.sink.is_some()
    }

    /// Fire-and-forget capture. Regular delivery runs on the current tokio runtime when
    /// there is one; without a runtime the record only reaches the local cache.
    pub fn capture(&self, req: CaptureRequest) {
        let delivery = req.delivery;
        let record = self.record_locally(&req);
        let Some(sink) = self.active_sink() else { return };
        match delivery {
            DeliveryMode::Unload => self.beacon(sink.as_ref(), record),
            DeliveryMode::Regular => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let this = self.clone();
                    let task = handle.spawn(async move { this.deliver(sink.as_ref(), &record).await });
                    let mut pending = self.inner.tracking.pending.lock();
                    pending.retain(|t| !t.is_finished());
                    pending.push(task);
                }
                Err(_) => self.note_failure(&SinkError::Unreachable("no async runtime".into())),
            },
        }
    }

    /// Capture and wait for the regular delivery to settle. Returns the record built.
    pub async fn capture_and_flush(&self, req: CaptureRequest) -> ErrorRecord {
        let delivery = req.delivery;
        let record = self.record_locally(&req);
        if let Some(sink) = self.active_sink() {
            match delivery {
                DeliveryMode::Unload => self.beacon(sink.as_ref(), record.clone()),
                DeliveryMode::Regular => self.deliver(sink.as_ref(), &record).await,
            }
        }
        record
    }

    /// Wait for regular deliveries started by [`capture`](Self::capture). Used before exit.
    pub async fn flush(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tracking.pending.lock());
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Most recent diagnostic copy, if any.
    pub fn last_diagnostic(&self) -> Option<DiagnosticEntry> {
        match self.inner.cache.last() {
            Ok(entry) => entry,
            Err(e) => {
                debug!(target: "collegium::reporter", "diagnostic cache unreadable: {:#}", e);
                None
            }
        }
    }

    pub fn captured(&self) -> u64 { self.inner.tracking.captured.load(Ordering::Relaxed) }

    /// Deliveries that failed since start (each was logged once).
    pub fn delivery_failures(&self) -> u64 { self.inner.tracking.failures.load(Ordering::Relaxed) }

    fn active_sink(&self) -> Option<Arc<dyn ErrorSink>> {
        if self.inner.remote_enabled { self.inner.sink.clone() } else { None }
    }

    fn record_locally(&self, req: &CaptureRequest) -> ErrorRecord {
        let url = self.resolve_url(req.url.as_deref());
        let user_ref = self.inner.session.as_ref().and_then(|s| s.user_ref());
        let record = ErrorRecord::build(&req.error, req.context_info.as_ref(), req.level, &url, user_ref);
        self.inner.tracking.captured.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.inner.cache.store(&DiagnosticEntry::from_record(&record)) {
            debug!(target: "collegium::reporter", "diagnostic cache write failed: {:#}", e);
        }
        debug!(target: "collegium::reporter", level = record.level.as_str(), url = %record.url, "captured: {}", record.message);
        record
    }

    fn resolve_url(&self, url: Option<&str>) -> String {
        match url {
            None => self.inner.app_url.clone(),
            Some(path) if path.starts_with('/') => format!("{}{}", self.inner.app_url.trim_end_matches('/'), path),
            Some(other) => other.to_string(),
        }
    }

    async fn deliver(&self, sink: &dyn ErrorSink, record: &ErrorRecord) {
        if let Err(e) = sink.send(record).await {
            self.note_failure(&e);
        }
    }

    fn beacon(&self, sink: &dyn ErrorSink, record: ErrorRecord) {
        if let Err(e) = sink.beacon(record) {
            self.note_failure(&e);
        }
    }

    fn note_failure(&self, err: &SinkError) {
        self.inner.tracking.failures.fetch_add(1, Ordering::Relaxed);
        warn!(target: "collegium::reporter", "error report not delivered: {}", err);
    }
}
