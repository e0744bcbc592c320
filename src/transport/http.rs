use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::protocol::SyncPayload;

use super::error::TransportError;

/// Request/response side of the backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch the authoritative nodes and timeline.
    async fn fetch_sync(&self) -> Result<SyncPayload, TransportError>;

    /// (Re)start a run of the traced program.
    async fn start_app(&self) -> Result<(), TransportError>;
}

/// [`Backend`] over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    client: Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_sync(&self) -> Result<SyncPayload, TransportError> {
        let url = self.endpoint("sync");
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::Status { status, body: text });
        }

        let payload: SyncPayload = serde_json::from_str(&text)?;
        tracing::debug!(
            steps = payload.timeline.len(),
            nodes = payload.nodes.len(),
            "Fetched sync payload"
        );
        Ok(payload)
    }

    async fn start_app(&self) -> Result<(), TransportError> {
        let url = self.endpoint("app_start");
        let response = self.client.post(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body });
        }
        Ok(())
    }
}
