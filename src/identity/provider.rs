use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::credential::Credential;
use super::principal::Identity;
use crate::config::AccessConfig;
use crate::error::{AuthError, TransportError};
use crate::refresh::RefreshBackend;
use crate::transport::{join_url, HttpTransport, Method, WireRequest};

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Body of a successful `POST /auth/login`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(flatten)]
    pub credential: Credential,
    pub user: Identity,
}

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("login rejected: HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed login response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Client for the identity backend: login, refresh and logout.
pub struct IdentityClient {
    transport: Arc<dyn HttpTransport>,
    login_url: String,
    refresh_url: String,
    logout_url: String,
}

impl IdentityClient {
    pub fn new(transport: Arc<dyn HttpTransport>, config: &AccessConfig) -> Result<Self, TransportError> {
        let base = config.identity_base_url.as_str();
        Ok(Self {
            transport,
            login_url: join_url(base, &config.login_path)?,
            refresh_url: join_url(base, &config.refresh_path)?,
            logout_url: join_url(base, &config.logout_path)?,
        })
    }

    pub async fn login(&self, req: &LoginRequest) -> Result<LoginResponse, LoginError> {
        let body = json!({"username": req.username, "password": req.password});
        let resp = self.transport.send(WireRequest::new(Method::Post, &self.login_url).json(body)).await?;
        if resp.is_unauthorized() || resp.is_forbidden() {
            return Err(LoginError::InvalidCredentials);
        }
        if !resp.is_success() {
            return Err(LoginError::Rejected { status: resp.status, message: resp.error_message() });
        }
        let login: LoginResponse = serde_json::from_slice(&resp.body).map_err(|e| LoginError::Malformed(e.to_string()))?;
        info!(target: "collegium::identity", user = %login.user.user_id, "login succeeded");
        Ok(login)
    }

    /// Best-effort server-side revocation. The local session is cleared regardless.
    pub async fn logout(&self, credential: &Credential) {
        let req = WireRequest::new(Method::Post, &self.logout_url)
            .bearer(credential.access_token.clone())
            .json(json!({"refreshToken": credential.refresh_token}));
        match self.transport.send(req).await {
            Ok(resp) if resp.is_success() => debug!(target: "collegium::identity", "server session revoked"),
            Ok(resp) => debug!(target: "collegium::identity", status = resp.status, "logout not acknowledged"),
            Err(e) => warn!(target: "collegium::identity", "logout call failed: {}", e),
        }
    }
}

#[async_trait]
impl RefreshBackend for IdentityClient {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, AuthError> {
        let req = WireRequest::new(Method::Post, &self.refresh_url).json(json!({"refreshToken": refresh_token}));
        let resp = self
            .transport
            .send(req)
            .await
            .map_err(|e| AuthError::ReauthRequired(format!("refresh call failed: {}", e)))?;
        if !resp.is_success() {
            return Err(AuthError::ReauthRequired(format!("refresh rejected: HTTP {}: {}", resp.status, resp.error_message())));
        }
        serde_json::from_slice::<Credential>(&resp.body)
            .map_err(|e| AuthError::ReauthRequired(format!("malformed refresh response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::WireResponse;
    use parking_lot::Mutex;

    struct Canned {
        status: u16,
        body: serde_json::Value,
        seen: Mutex<Vec<WireRequest>>,
    }

    #[async_trait]
    impl HttpTransport for Canned {
        async fn send(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
            self.seen.lock().push(request);
            Ok(WireResponse::json(self.status, &self.body))
        }
    }

    fn client(status: u16, body: serde_json::Value) -> (IdentityClient, Arc<Canned>) {
        let t = Arc::new(Canned { status, body, seen: Mutex::new(Vec::new()) });
        (IdentityClient::new(t.clone(), &AccessConfig::default()).unwrap(), t)
    }

    #[tokio::test]
    async fn login_parses_credential_and_user() {
        let (c, t) = client(200, json!({
            "accessToken": "A1", "refreshToken": "R1", "expiresAt": "2030-01-01T00:00:00Z",
            "user": {"userId": "bursar", "roles": ["finance"], "permissions": {"manage_fees": true}}
        }));
        let resp = c.login(&LoginRequest { username: "bursar".into(), password: "pw".into() }).await.unwrap();
        assert_eq!(resp.credential.access_token, "A1");
        assert_eq!(resp.user.user_id, "bursar");
        assert!(resp.user.has_role("Finance"));
        assert!(t.seen.lock()[0].url.ends_with("/auth/login"));
    }

    #[tokio::test]
    async fn login_401_is_invalid_credentials() {
        let (c, _) = client(401, json!({"error": "bad password"}));
        let err = c.login(&LoginRequest { username: "x".into(), password: "y".into() }).await.unwrap_err();
        assert!(matches!(err, LoginError::InvalidCredentials));
    }

    #[tokio::test]
    async fn refresh_sends_refresh_token() {
        let (c, t) = client(200, json!({"accessToken": "A2", "refreshToken": "R2", "expiresAt": "2030-01-01T00:00:00Z"}));
        let fresh = c.refresh("R1").await.unwrap();
        assert_eq!(fresh.access_token, "A2");
        let seen = t.seen.lock();
        assert!(seen[0].url.ends_with("/auth/refresh"));
        assert_eq!(seen[0].body.as_ref().unwrap()["refreshToken"], "R1");
        assert!(seen[0].bearer.is_none());
    }

    #[tokio::test]
    async fn refresh_rejection_requires_reauth() {
        let (c, _) = client(401, json!({"error": "refresh token expired"}));
        let err = c.refresh("R1").await.unwrap_err();
        assert!(matches!(err, AuthError::ReauthRequired(ref m) if m.contains("refresh token expired")));
    }
}
