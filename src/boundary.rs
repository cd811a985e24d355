//! Top-level failure policy: what a screen shows for a finished operation.
//!
//! Session failures go to login, permission denials fall back silently, and everything
//! else is captured by the reporter and shown as a generic retry view with a way home.
//! End users never see stack traces or backend messages.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::config::AccessConfig;
use crate::error::{Failure, FailureKind};
use crate::executor::RequestOutcome;
use crate::reporter::{CaptureRequest, ErrorInput, ErrorReporter};

pub const FALLBACK_TITLE: &str = "Something went wrong";
pub const FALLBACK_DETAIL: &str = "The request could not be completed. Try again, or go back to the dashboard.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackView {
    pub title: String,
    pub detail: String,
    pub retryable: bool,
    pub home_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum BoundaryView<T> {
    Content { data: T },
    /// Send the user to `login_route`, then back to `return_to`.
    Login { login_route: String, return_to: String },
    /// Expected outcome; render the no-permission fallback, nothing is reported.
    Denied { message: String },
    Fallback(FallbackView),
}

impl<T> BoundaryView<T> {
    pub fn is_content(&self) -> bool { matches!(self, BoundaryView::Content { .. }) }

    pub fn content(self) -> Option<T> {
        match self {
            BoundaryView::Content { data } => Some(data),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct ErrorBoundary {
    reporter: ErrorReporter,
    login_route: String,
    home_path: String,
}

impl ErrorBoundary {
    pub fn new<L: Into<String>, H: Into<String>>(reporter: ErrorReporter, login_route: L, home_path: H) -> Self {
        Self { reporter, login_route: login_route.into(), home_path: home_path.into() }
    }

    pub fn from_config(reporter: ErrorReporter, config: &AccessConfig) -> Self {
        Self::new(reporter, config.login_route.clone(), config.home_path.clone())
    }

    pub fn reporter(&self) -> &ErrorReporter { &self.reporter }

    /// `route` is where the operation was issued from; it becomes the login return path
    /// and the url of any captured record.
    pub fn resolve(&self, outcome: RequestOutcome, route: &str) -> BoundaryView<Value> {
        match outcome {
            RequestOutcome::Success(data) => BoundaryView::Content { data },
            RequestOutcome::Failure(f) => self.on_failure(f, route),
        }
    }

    pub fn resolve_result<T>(&self, result: Result<T, Failure>, route: &str) -> BoundaryView<T> {
        match result {
            Ok(data) => BoundaryView::Content { data },
            Err(f) => self.on_failure(f, route),
        }
    }

    /// Run `work` and resolve its result; a panic inside it is captured and shown as
    /// the fallback view instead of unwinding into the caller.
    pub async fn guard<T, F>(&self, route: &str, work: F) -> BoundaryView<T>
    where
        F: Future<Output = Result<T, Failure>>,
    {
        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(result) => self.resolve_result(result, route),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(target: "collegium::boundary", route, "operation panicked: {}", message);
                self.reporter.capture(
                    CaptureRequest::new(ErrorInput::Text(format!("panic: {}", message)))
                        .url(route)
                        .context(json!({ "kind": "panic" })),
                );
                BoundaryView::Fallback(self.fallback())
            }
        }
    }

    fn on_failure<T>(&self, failure: Failure, route: &str) -> BoundaryView<T> {
        match failure.kind {
            FailureKind::NoSession | FailureKind::ReauthRequired => {
                debug!(target: "collegium::boundary", route, kind = failure.code_str(), "redirecting to login");
                BoundaryView::Login { login_route: self.login_route.clone(), return_to: route.to_string() }
            }
            FailureKind::AuthorizationDenied => BoundaryView::Denied { message: failure.message },
            FailureKind::TransportError | FailureKind::ApplicationError => {
                let context = json!({ "kind": failure.code_str() });
                self.reporter.capture(CaptureRequest::new(failure).url(route).context(context));
                BoundaryView::Fallback(self.fallback())
            }
        }
    }

    fn fallback(&self) -> FallbackView {
        FallbackView {
            title: FALLBACK_TITLE.to_string(),
            detail: FALLBACK_DETAIL.to_string(),
            retryable: true,
            home_path: self.home_path.clone(),
        }
    }
}
