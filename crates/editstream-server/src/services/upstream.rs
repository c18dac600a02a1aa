use editstream_proto::{EditRequest, ErrorInfo, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::lifecycle::{FrameStream, OperationLifecycle};
use super::relay::relay_frames;
use crate::config::UpstreamConfig;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("upstream unreachable: {0}")]
    Unavailable(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<RelayError> for ErrorInfo {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::Unavailable(reason) => ErrorInfo::with_details("Upstream service unavailable", reason),
            RelayError::Status { status, body } => {
                ErrorInfo::with_details(format!("Upstream service error ({})", status), body)
            }
        }
    }
}

/// Client for another service that speaks the same event-stream protocol.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>, config: &UpstreamConfig) -> Self {
        // no overall timeout: an edit stream may legitimately run for minutes
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Open the upstream stream. Only a 2xx response counts as open.
    pub async fn open_stream(&self, path: &str, request: &EditRequest) -> Result<reqwest::Response, RelayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Opening upstream stream {}", url);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, CONTENT_TYPE)
            .json(request)
            .send()
            .await
            .map_err(|e| RelayError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Status { status, body });
        }

        Ok(response)
    }

    /// Forward `request` upstream and return the relayed body. A refusal
    /// before the stream opened becomes a single `error` frame.
    pub async fn relay(&self, path: &str, request: &EditRequest) -> FrameStream {
        match self.open_stream(path, request).await {
            Ok(response) => relay_frames(response.bytes_stream()),
            Err(e) => {
                warn!("Upstream refused {}: {}", path, e);
                OperationLifecycle::rejected(e.into())
            }
        }
    }
}
