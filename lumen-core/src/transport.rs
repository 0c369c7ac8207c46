use std::{fmt, time::Duration};

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::trace;

use crate::{error::Result, resource::ResourceId};

/// What came back from one transfer, before any classification.
#[derive(Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// `None` when the response carried no payload at all.
    pub body: Option<Vec<u8>>,
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .finish()
    }
}

/// Connection-level failure: DNS, TLS, reset, timeout.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(value: reqwest::Error) -> Self {
        TransportError(value.to_string())
    }
}

/// One HTTP GET. Implementations must be cancel-safe: the fetcher aborts the
/// task driving `get` when a request is cancelled.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Fetch the bytes behind `id`.
    async fn get(
        &self,
        id: &ResourceId,
    ) -> std::result::Result<RawResponse, TransportError>;
}

/// Client settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Connect phase only.
    pub connect_timeout: Duration,
    /// Sent with every request.
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("lumen/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client from `settings`.
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.connect_timeout)
            .user_agent(settings.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    /// Reuse an existing client, e.g. one with custom TLS roots.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        id: &ResourceId,
    ) -> std::result::Result<RawResponse, TransportError> {
        let response = self.client.get(id.url().clone()).send().await?;
        let status = response.status();
        trace!(%id, status = status.as_u16(), "image response headers received");

        // Non-2xx bodies are error pages; 204 has no payload by definition.
        if !status.is_success() || status == StatusCode::NO_CONTENT {
            return Ok(RawResponse {
                status: status.as_u16(),
                body: None,
            });
        }

        let bytes = response.bytes().await?;
        Ok(RawResponse {
            status: status.as_u16(),
            body: Some(bytes.to_vec()),
        })
    }
}
