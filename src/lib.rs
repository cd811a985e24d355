//! collegium: session-aware API access layer.
//!
//! Session store, coalesced credential refresh, a bounded refresh-and-retry executor,
//! permission gating, structured client error capture and the error boundary that ties
//! them together, plus an in-memory development backend.

pub mod error;
pub mod config;
pub mod transport;
pub mod identity;
pub mod permissions;
pub mod refresh;
pub mod executor;
pub mod reporter;
pub mod boundary;
pub mod client;
pub mod devserver;
pub mod cli;

pub use boundary::{BoundaryView, ErrorBoundary, FallbackView};
pub use client::AccessClient;
pub use config::AccessConfig;
pub use error::{Failure, FailureKind};
pub use executor::{Executor, Operation, RequestOutcome};
pub use identity::{Credential, Identity, SessionStore};
pub use permissions::PermissionMap;
pub use refresh::Refresher;
pub use reporter::{CaptureRequest, ErrorReporter};

