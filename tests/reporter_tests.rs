use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use collegium::error::SinkError;
use collegium::reporter::{
    CaptureRequest, DiagnosticCache, ErrorRecord, ErrorReporter, ErrorSink, FileDiagnosticCache, HttpErrorSink,
};

/// Counts WARN events emitted by the reporter.
struct CountingLayer {
    warns: Arc<AtomicUsize>,
}

impl<S: Subscriber> Layer<S> for CountingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() == Level::WARN && meta.target() == "collegium::reporter" {
            self.warns.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct AlwaysRejecting;

#[async_trait]
impl ErrorSink for AlwaysRejecting {
    async fn send(&self, _record: &ErrorRecord) -> Result<(), SinkError> {
        Err(SinkError::Rejected(500))
    }

    fn beacon(&self, _record: ErrorRecord) -> Result<(), SinkError> {
        Err(SinkError::Unreachable("gone".into()))
    }
}

#[tokio::test]
async fn rejecting_sink_logs_once_and_keeps_local_copy() {
    let warns = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(CountingLayer { warns: warns.clone() });
    let _guard = tracing::subscriber::set_default(subscriber);

    let reporter = ErrorReporter::local("collegium://app").with_sink(Arc::new(AlwaysRejecting), true);
    let record = reporter
        .capture_and_flush(CaptureRequest::new("attendance sync failed").url("/attendance").context(json!({"batch": 7})))
        .await;

    assert_eq!(record.context_info, r#"{"batch":7}"#);
    assert_eq!(warns.load(Ordering::SeqCst), 1);
    assert_eq!(reporter.delivery_failures(), 1);
    let diag = reporter.last_diagnostic().unwrap();
    assert_eq!(diag.message, "attendance sync failed");
    assert_eq!(diag.url, "collegium://app/attendance");
}

#[tokio::test]
async fn unreachable_http_sink_is_swallowed() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(FileDiagnosticCache::new(dir.path()));
    let sink = HttpErrorSink::new("http://127.0.0.1:1/client-errors", Duration::from_secs(2)).unwrap();
    let reporter = ErrorReporter::new(cache.clone(), "collegium://app").with_sink(Arc::new(sink), true);

    reporter.capture(CaptureRequest::new(anyhow::anyhow!("ledger locked")));
    reporter.flush().await;

    assert_eq!(reporter.delivery_failures(), 1);
    assert_eq!(cache.last().unwrap().unwrap().message, "ledger locked");
}

#[tokio::test]
async fn diagnostic_copy_survives_a_new_reporter() {
    let dir = tempfile::tempdir().unwrap();
    let first = ErrorReporter::new(Arc::new(FileDiagnosticCache::new(dir.path())), "collegium://app");
    first.capture_and_flush(CaptureRequest::new("older")).await;
    first.capture_and_flush(CaptureRequest::new("newest")).await;

    let second = ErrorReporter::new(Arc::new(FileDiagnosticCache::new(dir.path())), "collegium://app");
    assert_eq!(second.last_diagnostic().unwrap().message, "newest");
}
