//! HTTP seam shared by the executor, the identity client and the error sink.
//!
//! The executor only needs "send this request, tell me the status and body"; everything
//! reqwest-specific stays in [`ReqwestTransport`]. Tests swap in scripted transports.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One HTTP exchange as the transport sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub method: Method,
    pub url: String,
    /// Sent as `Authorization: Bearer <token>` when present.
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

impl WireRequest {
    pub fn new<S: Into<String>>(method: Method, url: S) -> Self {
        Self { method, url: url.into(), bearer: None, body: None }
    }

    pub fn bearer<S: Into<String>>(mut self, token: S) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WireResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl WireResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self { status, body: body.to_string().into_bytes() }
    }

    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }

    pub fn is_unauthorized(&self) -> bool { self.status == 401 }

    pub fn is_forbidden(&self) -> bool { self.status == 403 }

    /// Decode the body as JSON; an empty body decodes as `null`.
    pub fn json_value(&self) -> Result<Value, serde_json::Error> {
        if self.body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.body)
    }

    /// Best-effort human message from an error body: `message`, then `error`, then raw text.
    pub fn error_message(&self) -> String {
        if let Ok(v) = serde_json::from_slice::<Value>(&self.body) {
            for field in ["message", "error"] {
                if let Some(s) = v.get(field).and_then(|m| m.as_str()) {
                    return s.to_string();
                }
            }
        }
        let text = String::from_utf8_lossy(&self.body).trim().to_string();
        if text.is_empty() { format!("HTTP {}", self.status) } else { text }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, TransportError>;
}

/// Production transport over a shared `reqwest::Client`. Timeouts come from the client;
/// the executor has none of its own.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        let url = Url::parse(&request.url).map_err(|e| TransportError::InvalidRequest(format!("{}: {}", request.url, e)))?;
        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Patch => self.client.patch(url),
            Method::Delete => self.client.delete(url),
        };
        if let Some(token) = request.bearer.as_deref() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }
        let resp = builder.send().await.map_err(classify_reqwest_error)?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(classify_reqwest_error)?;
        Ok(WireResponse { status, body: body.to_vec() })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Unreachable(err.to_string())
    } else if err.is_builder() {
        TransportError::InvalidRequest(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

/// Join an endpoint onto a base URL, keeping any path prefix of the base.
/// Absolute endpoints (`http://...`) are used as given.
pub fn join_url(base: &str, endpoint: &str) -> Result<String, TransportError> {
    let raw = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), endpoint.trim_start_matches('/'))
    };
    Url::parse(&raw)
        .map(|u| u.to_string())
        .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", raw, e)))
}
