//! Failure taxonomy shared by the executor, the refresher and the error boundary.
//! `Failure` is the tagged value handed back to callers; the `thiserror` enums below are
//! the component-level errors that get classified into it.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Classification of a failed logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No credential present; the caller must send the user to login.
    NoSession,
    /// Refresh failed or the refreshed credential was rejected; the session is over.
    ReauthRequired,
    /// Session is valid but the caller lacks the permission.
    AuthorizationDenied,
    /// Network, timeout or cancellation.
    TransportError,
    /// The backend answered with a well-formed non-success response.
    ApplicationError,
}

impl FailureKind {
    pub fn code_str(&self) -> &'static str {
        match self {
            FailureKind::NoSession => "no_session",
            FailureKind::ReauthRequired => "reauth_required",
            FailureKind::AuthorizationDenied => "authorization_denied",
            FailureKind::TransportError => "transport_error",
            FailureKind::ApplicationError => "application_error",
        }
    }

    /// Session-level failures send the user back to login instead of a retry view.
    pub fn requires_login(&self) -> bool {
        matches!(self, FailureKind::NoSession | FailureKind::ReauthRequired)
    }
}

/// A failed outcome: kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new<S: Into<String>>(kind: FailureKind, message: S) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn no_session<S: Into<String>>(msg: S) -> Self { Self::new(FailureKind::NoSession, msg) }
    pub fn reauth_required<S: Into<String>>(msg: S) -> Self { Self::new(FailureKind::ReauthRequired, msg) }
    pub fn denied<S: Into<String>>(msg: S) -> Self { Self::new(FailureKind::AuthorizationDenied, msg) }
    pub fn transport<S: Into<String>>(msg: S) -> Self { Self::new(FailureKind::TransportError, msg) }
    pub fn application<S: Into<String>>(msg: S) -> Self { Self::new(FailureKind::ApplicationError, msg) }

    pub fn code_str(&self) -> &'static str { self.kind.code_str() }

    pub fn message(&self) -> &str { self.message.as_str() }

    /// Map to the HTTP status a server-side surface would answer with.
    pub fn http_status(&self) -> u16 {
        match self.kind {
            FailureKind::NoSession | FailureKind::ReauthRequired => 401,
            FailureKind::AuthorizationDenied => 403,
            FailureKind::TransportError => 503,
            FailureKind::ApplicationError => 502,
        }
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for Failure {}

/// Errors produced by the credential refresher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no session to refresh")]
    NoSession,
    #[error("re-authentication required: {0}")]
    ReauthRequired(String),
}

impl From<AuthError> for Failure {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NoSession => Failure::no_session("no active session"),
            AuthError::ReauthRequired(msg) => Failure::reauth_required(msg),
        }
    }
}

/// Errors raised below the HTTP status layer. None of these are retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("transport failure: {0}")]
    Other(String),
}

impl From<TransportError> for Failure {
    fn from(err: TransportError) -> Self {
        Failure::transport(err.to_string())
    }
}

/// Errors from a remote error sink. Always swallowed by the reporter after one log line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("sink rejected record: HTTP {0}")]
    Rejected(u16),
    #[error("sink unreachable: {0}")]
    Unreachable(String),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
