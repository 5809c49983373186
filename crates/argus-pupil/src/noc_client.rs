//! Retrying NOC client with persist-on-failure.
//!
//! Unlike the daemon's worker, the pupil has no snapshot loop that would
//! re-derive a lost dispatch, so this client retries with exponential
//! backoff and - when every attempt fails - persists the message to the
//! recovery store and asks the host for a graceful shutdown. The next boot
//! replays the record.

use std::sync::Arc;

use argus_core::noc::{NocClientConfig, NocDetails, NocMessage, CORRELATION_HEADER, SOURCE_HEADER};
use chrono::Utc;
use tokio::sync::watch;

use crate::recovery::{RecoveryRecord, RecoveryStore};

/// Errors from a pupil NOC dispatch.
#[derive(Debug, thiserror::Error)]
pub enum PupilNocError {
    /// The endpoint answered with a non-2xx status.
    #[error("HTTP {0}")]
    Status(u16),

    /// The request never completed.
    #[error("{0}")]
    Transport(String),

    /// Every attempt failed; a recovery record was persisted and shutdown
    /// requested.
    #[error("all {attempts} NOC attempts failed: {last_error}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        last_error: String,
    },
}

/// The pupil's NOC client.
pub struct PupilNocClient {
    http: reqwest::Client,
    config: NocClientConfig,
    recovery: Arc<RecoveryStore>,
    shutdown: watch::Sender<bool>,
}

impl PupilNocClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        config: NocClientConfig,
        recovery: Arc<RecoveryStore>,
        shutdown: watch::Sender<bool>,
    ) -> Result<Self, PupilNocError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PupilNocError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            config,
            recovery,
            shutdown,
        })
    }

    /// Dispatch one message, retrying per the configured policy.
    ///
    /// `send_to_noc = false` is a no-op success. On final failure the
    /// message is persisted and a graceful shutdown is requested; the
    /// returned error reports the exhaustion.
    ///
    /// # Errors
    ///
    /// Returns [`PupilNocError::Exhausted`] after the final failed attempt.
    pub async fn send(
        &self,
        details: &NocDetails,
        correlation_id: &str,
    ) -> Result<(), PupilNocError> {
        if !details.send_to_noc {
            tracing::debug!(
                correlation_id = %correlation_id,
                "send_to_noc disabled, skipping dispatch"
            );
            return Ok(());
        }

        let message = NocMessage::from_details(details, correlation_id);
        let attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.retry_delay(attempt - 1)).await;
            }
            match self.post(&message).await {
                Ok(()) => {
                    tracing::info!(
                        correlation_id = %correlation_id,
                        attempt,
                        "NOC message dispatched"
                    );
                    return Ok(());
                }
                Err(error) => {
                    last_error = error.to_string();
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        attempt,
                        error = %last_error,
                        "NOC dispatch attempt failed"
                    );
                }
            }
        }

        let record = RecoveryRecord::new(correlation_id, &last_error, details.clone());
        if let Err(error) = self.recovery.write(&record) {
            tracing::error!(%error, "failed to persist recovery record");
        }

        tracing::error!(
            correlation_id = %correlation_id,
            attempts,
            "NOC unreachable, requesting graceful shutdown"
        );
        let _ = self.shutdown.send(true);

        Err(PupilNocError::Exhausted {
            attempts,
            last_error,
        })
    }

    async fn post(&self, message: &NocMessage) -> Result<(), PupilNocError> {
        let response = self
            .http
            .post(&self.config.endpoint)
            .header(CORRELATION_HEADER, &message.correlation_id)
            .header(SOURCE_HEADER, &message.source)
            .json(message)
            .send()
            .await
            .map_err(|e| PupilNocError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PupilNocError::Status(status.as_u16()))
        }
    }
}

impl std::fmt::Debug for PupilNocClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PupilNocClient")
            .field("endpoint", &self.config.endpoint)
            .field("max_retries", &self.config.max_retries)
            .finish_non_exhaustive()
    }
}

/// Replay a persisted recovery record at boot.
///
/// The record's summary gets a `"[RECOVERY]"` prefix and its description is
/// annotated with the original failure. Success deletes the file; failure
/// leaves it in place for the next boot (the client will have persisted a
/// fresh record for that attempt).
pub async fn replay_recovery(store: &RecoveryStore, client: &PupilNocClient) {
    let Some(record) = store.read() else {
        return;
    };

    tracing::warn!(
        correlation_id = %record.correlation_id,
        failed_at = %record.failed_at,
        "replaying persisted NOC message"
    );

    let mut details = record.noc_details.clone();
    if !details.summary.starts_with("[RECOVERY]") {
        details.summary = format!("[RECOVERY] {}", details.summary);
    }
    details.description = format!(
        "{}\noriginal dispatch failed at {} ({})",
        details.description, record.failed_at, record.failure_reason
    );

    match client.send(&details, &record.correlation_id).await {
        Ok(()) => {
            tracing::info!(
                correlation_id = %record.correlation_id,
                recovered_at = %Utc::now(),
                "recovery record replayed, deleting file"
            );
            store.delete();
        }
        Err(error) => {
            tracing::error!(
                correlation_id = %record.correlation_id,
                %error,
                "recovery replay failed, record kept for next boot"
            );
        }
    }
}
