//! Resilient request executor.
//!
//! One logical operation = at most two wire attempts. The second attempt only happens
//! after the first was definitively rejected with 401 and a refresh produced a usable
//! credential; anything ambiguous (timeouts, dropped connections) is handed back to the
//! caller untouched so non-idempotent writes are never replayed.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Failure, FailureKind};
use crate::identity::{Credential, SessionStore};
use crate::refresh::Refresher;
use crate::transport::{join_url, HttpTransport, Method, WireRequest, WireResponse};

/// Caller-supplied description of one logical request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub endpoint: String,
    pub method: Method,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub requires_permission: Option<String>,
}

impl Operation {
    pub fn new<S: Into<String>>(method: Method, endpoint: S) -> Self {
        Self { endpoint: endpoint.into(), method, body: None, requires_permission: None }
    }

    pub fn get<S: Into<String>>(endpoint: S) -> Self { Self::new(Method::Get, endpoint) }
    pub fn post<S: Into<String>>(endpoint: S, body: Value) -> Self { Self::new(Method::Post, endpoint).body(body) }
    pub fn put<S: Into<String>>(endpoint: S, body: Value) -> Self { Self::new(Method::Put, endpoint).body(body) }
    pub fn patch<S: Into<String>>(endpoint: S, body: Value) -> Self { Self::new(Method::Patch, endpoint).body(body) }
    pub fn delete<S: Into<String>>(endpoint: S) -> Self { Self::new(Method::Delete, endpoint) }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn requires<S: Into<String>>(mut self, permission: S) -> Self {
        self.requires_permission = Some(permission.into());
        self
    }
}

/// Final result of an operation. Exactly one of payload or failure.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Success(Value),
    Failure(Failure),
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool { matches!(self, RequestOutcome::Success(_)) }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            RequestOutcome::Success(_) => None,
            RequestOutcome::Failure(f) => Some(f.kind),
        }
    }

    pub fn into_result(self) -> Result<Value, Failure> {
        match self {
            RequestOutcome::Success(v) => Ok(v),
            RequestOutcome::Failure(f) => Err(f),
        }
    }
}

impl From<Failure> for RequestOutcome {
    fn from(f: Failure) -> Self { RequestOutcome::Failure(f) }
}

enum Attempt {
    Unauthorized,
    Done(RequestOutcome),
}

#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn HttpTransport>,
    session: SessionStore,
    refresher: Refresher,
    base_url: String,
}

impl Executor {
    pub fn new<S: Into<String>>(transport: Arc<dyn HttpTransport>, refresher: Refresher, base_url: S) -> Self {
        let session = refresher.session().clone();
        Self { transport, session, refresher, base_url: base_url.into() }
    }

    pub fn session(&self) -> &SessionStore { &self.session }

    pub fn refresher(&self) -> &Refresher { &self.refresher }

    pub async fn execute(&self, op: Operation) -> RequestOutcome {
        let Some(credential) = self.session.current() else {
            debug!(target: "collegium::executor", method = %op.method, endpoint = %op.endpoint, "no session; not sending");
            return Failure::no_session("no active session; sign in first").into();
        };
        if let Some(key) = op.requires_permission.as_deref() {
            if !self.session.allows(key) {
                debug!(target: "collegium::executor", permission = key, endpoint = %op.endpoint, "permission not granted; not sending");
                return Failure::denied(format!("permission '{}' is required", key)).into();
            }
        }
        let url = match join_url(&self.base_url, &op.endpoint) {
            Ok(u) => u,
            Err(e) => return Failure::from(e).into(),
        };

        match self.attempt(&op, &url, &credential).await {
            Attempt::Done(outcome) => return outcome,
            Attempt::Unauthorized => {}
        }

        info!(target: "collegium::executor", method = %op.method, endpoint = %op.endpoint, "credential rejected; refreshing once");
        let fresh = match self.refresher.refresh_rejected(&credential.access_token).await {
            Ok(c) => c,
            Err(e) => return Failure::from(e).into(),
        };

        match self.attempt(&op, &url, &fresh).await {
            Attempt::Done(outcome) => outcome,
            Attempt::Unauthorized => {
                warn!(target: "collegium::executor", method = %op.method, endpoint = %op.endpoint, "refreshed credential rejected; ending session");
                self.session.clear_if_current(&fresh.access_token);
                Failure::reauth_required("the refreshed credential was rejected; sign in again").into()
            }
        }
    }

    /// Execute and decode the success payload into `T`.
    pub async fn execute_as<T: DeserializeOwned>(&self, op: Operation) -> Result<T, Failure> {
        let payload = self.execute(op).await.into_result()?;
        serde_json::from_value(payload).map_err(|e| Failure::application(format!("unexpected response shape: {}", e)))
    }

    async fn attempt(&self, op: &Operation, url: &str, credential: &Credential) -> Attempt {
        let request = WireRequest {
            method: op.method,
            url: url.to_string(),
            bearer: Some(credential.access_token.clone()),
            body: op.body.clone(),
        };
        match self.transport.send(request).await {
            Ok(resp) => classify(resp),
            Err(e) => {
                debug!(target: "collegium::executor", "transport failure: {}", e);
                Attempt::Done(Failure::from(e).into())
            }
        }
    }
}

fn classify(resp: WireResponse) -> Attempt {
    if resp.is_unauthorized() {
        return Attempt::Unauthorized;
    }
    let outcome = if resp.is_success() {
        match resp.json_value() {
            Ok(payload) => RequestOutcome::Success(payload),
            Err(e) => Failure::application(format!("malformed response body: {}", e)).into(),
        }
    } else if resp.is_forbidden() {
        Failure::denied(resp.error_message()).into()
    } else {
        Failure::application(format!("HTTP {}: {}", resp.status, resp.error_message())).into()
    };
    Attempt::Done(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use serde_json::json;

    #[test]
    fn classify_maps_statuses() {
        assert!(matches!(classify(WireResponse::new(401, "")), Attempt::Unauthorized));
        let Attempt::Done(o) = classify(WireResponse::json(200, &json!({"ok": true}))) else { panic!("expected done") };
        assert_eq!(o, RequestOutcome::Success(json!({"ok": true})));
        let Attempt::Done(o) = classify(WireResponse::json(403, &json!({"message": "finance only"}))) else { panic!() };
        assert_eq!(o, RequestOutcome::Failure(Failure::denied("finance only")));
        let Attempt::Done(o) = classify(WireResponse::new(500, "boom")) else { panic!() };
        assert_eq!(o.failure_kind(), Some(FailureKind::ApplicationError));
        let Attempt::Done(o) = classify(WireResponse::new(200, "<html>")) else { panic!() };
        assert_eq!(o.failure_kind(), Some(FailureKind::ApplicationError));
    }

    #[test]
    fn operation_builders() {
        let op = Operation::post("/fees", json!({"amount": 1200})).requires("manage_fees");
        assert_eq!(op.method, Method::Post);
        assert_eq!(op.requires_permission.as_deref(), Some("manage_fees"));
        let wire = serde_json::to_value(&op).unwrap();
        assert_eq!(wire["requiresPermission"], "manage_fees");
        assert_eq!(wire["method"], "POST");
    }

    #[test]
    fn outcome_into_result() {
        let f: RequestOutcome = Failure::from(TransportError::Cancelled).into();
        assert_eq!(f.clone().into_result().unwrap_err().kind, FailureKind::TransportError);
        assert!(!f.is_success());
    }
}
