//! Wire contract for the external NOC endpoint.
//!
//! Every dispatch is a JSON `POST` with `X-Correlation-ID` and `X-Source`
//! headers; any non-2xx reply counts as a failure. The daemon's queue worker
//! and the pupil's retrying client both speak this shape.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::Alert;
use crate::duration::{format_duration, serde_str};

/// Correlation ID header attached to every NOC request.
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Source header identifying the dispatching component.
pub const SOURCE_HEADER: &str = "X-Source";

/// The JSON body POSTed to the NOC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NocMessage {
    /// Dispatch priority; lower is more urgent.
    pub priority: i64,
    /// Rule or subsystem name.
    pub name: String,
    /// One-line human summary.
    pub summary: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Opaque payload forwarded verbatim.
    #[serde(default)]
    pub payload: String,
    /// Producing source.
    pub source: String,
    /// Suppression window in the duration grammar, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppress_window: Option<String>,
    /// Correlation ID, mirrored in the request header.
    pub correlation_id: String,
    /// Dispatch time.
    pub timestamp: DateTime<Utc>,
}

impl NocMessage {
    /// Build the wire message for an alert.
    #[must_use]
    pub fn from_alert(alert: &Alert, correlation_id: &str) -> Self {
        Self {
            priority: alert.priority,
            name: alert.name.clone(),
            summary: alert.summary.clone(),
            description: alert.description.clone(),
            payload: alert.payload.clone(),
            source: alert.source.clone(),
            suppress_window: alert.suppress_window.map(format_duration),
            correlation_id: correlation_id.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Build the wire message from pupil-supplied NOC details.
    #[must_use]
    pub fn from_details(details: &NocDetails, correlation_id: &str) -> Self {
        Self {
            priority: details.priority,
            name: details.name.clone(),
            summary: details.summary.clone(),
            description: details.description.clone(),
            payload: details.payload.clone(),
            source: details.source.clone(),
            suppress_window: details.suppress_window.clone(),
            correlation_id: correlation_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// NOC details carried by pupil requests and recovery records: what to send
/// when the watchdog expires or a send is requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NocDetails {
    /// Dispatch priority.
    #[serde(default)]
    pub priority: i64,
    /// Rule or subsystem name.
    pub name: String,
    /// One-line human summary.
    pub summary: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Opaque payload forwarded verbatim.
    #[serde(default)]
    pub payload: String,
    /// Producing source.
    #[serde(default = "default_source")]
    pub source: String,
    /// Whether dispatch is requested at all.
    #[serde(default = "default_send_to_noc")]
    pub send_to_noc: bool,
    /// Suppression window in the duration grammar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppress_window: Option<String>,
}

fn default_source() -> String {
    "pupil".to_string()
}

const fn default_send_to_noc() -> bool {
    true
}

/// NOC client options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NocClientConfig {
    /// NOC endpoint URL.
    pub endpoint: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    #[serde(with = "serde_str")]
    pub timeout: Duration,

    /// Retries after the first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base retry delay in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Multiplier applied per retry attempt.
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,
}

const fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_delay_ms() -> u64 {
    500
}

const fn default_retry_multiplier() -> f64 {
    2.0
}

/// NOC client configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum NocClientConfigError {
    /// No endpoint configured.
    #[error("NOC endpoint is required")]
    MissingEndpoint,

    /// Timeout below one second.
    #[error("NOC timeout must be at least 1s, got {0:?}")]
    TimeoutTooShort(Duration),
}

impl NocClientConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint is empty or the timeout is below
    /// one second.
    pub fn validate(&self) -> Result<(), NocClientConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(NocClientConfigError::MissingEndpoint);
        }
        if self.timeout < Duration::from_secs(1) {
            return Err(NocClientConfigError::TimeoutTooShort(self.timeout));
        }
        Ok(())
    }

    /// Delay before retry `attempt` (1-based): `retry_delay_ms x
    /// retry_multiplier^(attempt-1)`.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_possible_wrap)] // attempt count stays tiny
        let millis =
            (self.retry_delay_ms as f64) * self.retry_multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis(millis as u64)
    }
}
