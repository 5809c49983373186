//! Single-attempt HTTP client for NOC dispatch.
//!
//! The queue worker deliberately does not retry: a failed dispatch is not
//! marked as sent, so the next snapshot re-derives and re-enqueues the
//! decision. Retrying lives with the pupil's client, which has no snapshot
//! loop behind it.

use std::time::Duration;

use argus_core::noc::{NocMessage, CORRELATION_HEADER, SOURCE_HEADER};
use async_trait::async_trait;

/// Errors from a NOC dispatch.
#[derive(Debug, thiserror::Error)]
pub enum NocSendError {
    /// The endpoint answered with a non-2xx status.
    #[error("NOC answered HTTP {0}")]
    Status(u16),

    /// The request never completed.
    #[error("NOC request failed: {0}")]
    Transport(String),
}

/// The dispatch seam the queue worker posts through; production uses
/// [`NocHttpClient`], tests record the messages.
#[async_trait]
pub trait NocDispatcher: Send + Sync {
    /// POST one message. Any non-2xx reply is a failure.
    async fn post(&self, message: &NocMessage) -> Result<(), NocSendError>;
}

/// JSON POST client for the NOC endpoint.
#[derive(Debug, Clone)]
pub struct NocHttpClient {
    http: reqwest::Client,
    endpoint: String,
}

impl NocHttpClient {
    /// Create a client with the given per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, NocSendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NocSendError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    async fn post_inner(&self, message: &NocMessage) -> Result<(), NocSendError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(CORRELATION_HEADER, &message.correlation_id)
            .header(SOURCE_HEADER, &message.source)
            .json(message)
            .send()
            .await
            .map_err(|e| NocSendError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NocSendError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl NocDispatcher for NocHttpClient {
    async fn post(&self, message: &NocMessage) -> Result<(), NocSendError> {
        self.post_inner(message).await
    }
}
