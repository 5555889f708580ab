use futures::{Stream, StreamExt};
use thiserror::Error;

use crate::error::AppError;
use crate::models::RunRequest;
use crate::runs::decoder::FrameDecoder;
use crate::runs::events::RunEvent;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("backend response had no body")]
    EmptyBody,
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        match &err {
            BackendError::Transport(_) => AppError::backend(err.to_string()),
            BackendError::Status { .. } => AppError::backend(err.to_string()),
            BackendError::EmptyBody => AppError::stream(err.to_string()),
        }
    }
}

// ============================================================================
// Backend Client
// ============================================================================

/// Client for the browser-test execution backend.
///
/// One streaming POST per run exchange. The run stream is lazy: nothing is
/// read until the caller polls, and dropping the stream aborts the upstream
/// connection instead of draining it.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Open the raw streaming exchange without touching the body.
    ///
    /// The relay uses this directly so upstream bytes pass through verbatim;
    /// status inspection is left to the caller.
    pub async fn open_run_stream(
        &self,
        request: &RunRequest,
    ) -> Result<reqwest::Response, BackendError> {
        let response = self
            .client
            .post(format!("{}/api/tests/execute", self.base_url))
            .json(request)
            .send()
            .await?;
        Ok(response)
    }

    /// Execute one run exchange and decode its event stream.
    ///
    /// Fails fast when the initial response is not a success, capturing
    /// whatever error body the backend sent before giving up.
    pub async fn execute_run(
        &self,
        request: &RunRequest,
    ) -> Result<impl Stream<Item = RunEvent>, BackendError> {
        let response = self.open_run_stream(request).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }
        if response.content_length() == Some(0) {
            return Err(BackendError::EmptyBody);
        }

        Ok(decode_run_stream(response))
    }

    /// Probe the backend health endpoint.
    pub async fn ping(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Status {
                status: response.status(),
                body: String::new(),
            })
        }
    }
}

/// Decode a streaming response body into run events.
///
/// Each transport chunk is fed through a fresh [`FrameDecoder`]; decode
/// failures are absorbed inside the decoder. A mid-stream transport error
/// ends the sequence — the state machine treats the missing `run_completed`
/// as an abnormal end.
fn decode_run_stream(response: reqwest::Response) -> impl Stream<Item = RunEvent> {
    async_stream::stream! {
        let mut decoder = FrameDecoder::new();
        let mut chunks = response.bytes_stream();

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in decoder.feed_bytes(&bytes) {
                        yield event;
                    }
                }
                Err(e) => {
                    log::warn!("Run stream transport error: {}", e);
                    break;
                }
            }
        }

        if let Some(event) = decoder.finish() {
            yield event;
        }
    }
}
