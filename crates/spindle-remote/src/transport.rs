use crate::error::RemoteError;
use crate::protocol::{RequestPayload, ResponsePayload, SignedRequest};
use crate::signing::RequestSigner;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Delivers one request and returns the decoded response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, payload: &RequestPayload) -> Result<ResponsePayload, RemoteError>;
}

/// Posts signed requests to `<base_url>/api/neurobass`.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    signer: Arc<dyn RequestSigner>,
}

impl HttpTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(
        base_url: &str,
        signer: Arc<dyn RequestSigner>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/neurobass", base_url.trim_end_matches('/')),
            signer,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, payload: &RequestPayload) -> Result<ResponsePayload, RemoteError> {
        let value = serde_json::to_value(payload)?;
        let envelope = SignedRequest {
            payload,
            from_client_id: self.signer.client_id(),
            signature: self.signer.sign(&value)?,
        };

        tracing::debug!(request = payload.type_name(), "Posting request");
        let resp = self.client.post(&self.endpoint).json(&envelope).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}
