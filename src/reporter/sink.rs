use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::record::ErrorRecord;
use crate::error::SinkError;

/// How a record leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// A regular request whose result is observed.
    #[default]
    Regular,
    /// The caller is going away: hand the record off and do not wait for it.
    Unload,
}

/// Remote destination for error records.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn send(&self, record: &ErrorRecord) -> Result<(), SinkError>;

    /// Queue the record for a detached send. `Err` only when it could not be handed off;
    /// what happens to it afterwards is not observed.
    fn beacon(&self, record: ErrorRecord) -> Result<(), SinkError>;
}

/// POSTs records as JSON to the logging endpoint.
#[derive(Clone)]
pub struct HttpErrorSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpErrorSink {
    pub fn new<S: Into<String>>(endpoint: S, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Unreachable(e.to_string()))?;
        Ok(Self { client, endpoint: endpoint.into() })
    }

    pub fn endpoint(&self) -> &str { &self.endpoint }
}

async fn post_record(client: &reqwest::Client, endpoint: &str, record: &ErrorRecord) -> Result<(), SinkError> {
    let resp = client
        .post(endpoint)
        .json(record)
        .send()
        .await
        .map_err(|e| SinkError::Unreachable(e.to_string()))?;
    let status = resp.status();
    if status.is_success() { Ok(()) } else { Err(SinkError::Rejected(status.as_u16())) }
}

#[async_trait]
impl ErrorSink for HttpErrorSink {
    async fn send(&self, record: &ErrorRecord) -> Result<(), SinkError> {
        post_record(&self.client, &self.endpoint, record).await
    }

    fn beacon(&self, record: ErrorRecord) -> Result<(), SinkError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| SinkError::Unreachable("no async runtime for detached send".into()))?;
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        handle.spawn(async move {
            if let Err(e) = post_record(&client, &endpoint, &record).await {
                debug!(target: "collegium::reporter", "detached error delivery failed: {}", e);
            }
        });
        Ok(())
    }
}
