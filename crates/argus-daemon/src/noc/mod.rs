//! NOC dispatch pipeline: suppression cache, decision queue and snapshot
//! service.
//!
//! Snapshots read the vector and enqueue [`NocDecision`]s; the queue worker
//! drains them strictly FIFO, re-reading the vector before each dispatch so
//! a stale decision never acts on an alert that has since changed status.

mod client;
mod queue;
mod snapshot;
mod suppression;

use std::time::Duration;

use argus_core::alert::Alert;
use argus_core::duration::serde_str;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use client::{NocDispatcher, NocHttpClient, NocSendError};
pub use queue::{NocQueue, NocWorker};
pub use snapshot::SnapshotService;
pub use suppression::SuppressionCache;

/// A dispatch decision taken from one snapshot.
#[derive(Debug, Clone)]
pub enum NocDecision {
    /// Forward the highest-priority active CREATE.
    HandleCreate {
        /// The alert at snapshot time.
        alert: Alert,
        /// When the snapshot was taken.
        taken_at: DateTime<Utc>,
        /// Snapshot correlation ID.
        correlation_id: String,
    },
    /// Forward the first UNKNOWN, then drop it from the vector.
    HandleUnknown {
        /// The alert at snapshot time.
        alert: Alert,
        /// When the snapshot was taken.
        taken_at: DateTime<Utc>,
        /// Snapshot correlation ID.
        correlation_id: String,
    },
    /// Withdraw a batch of CANCELs.
    HandleCancels {
        /// The alerts at snapshot time.
        alerts: Vec<Alert>,
        /// When the snapshot was taken.
        taken_at: DateTime<Utc>,
        /// Snapshot correlation ID.
        correlation_id: String,
    },
}

impl NocDecision {
    /// Decision kind label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::HandleCreate { .. } => "create",
            Self::HandleUnknown { .. } => "unknown",
            Self::HandleCancels { .. } => "cancels",
        }
    }

    /// Build a create decision.
    #[must_use]
    pub fn create(alert: Alert, correlation_id: &str) -> Self {
        Self::HandleCreate {
            alert,
            taken_at: Utc::now(),
            correlation_id: correlation_id.to_string(),
        }
    }

    /// Build an unknown decision.
    #[must_use]
    pub fn unknown(alert: Alert, correlation_id: &str) -> Self {
        Self::HandleUnknown {
            alert,
            taken_at: Utc::now(),
            correlation_id: correlation_id.to_string(),
        }
    }

    /// Build a cancel-batch decision.
    #[must_use]
    pub fn cancels(alerts: Vec<Alert>, correlation_id: &str) -> Self {
        Self::HandleCancels {
            alerts,
            taken_at: Utc::now(),
            correlation_id: correlation_id.to_string(),
        }
    }
}

/// NOC pipeline options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NocConfig {
    /// NOC endpoint URL.
    pub endpoint: String,

    /// Per-POST timeout.
    #[serde(default = "default_timeout")]
    #[serde(with = "serde_str")]
    pub timeout: Duration,

    /// Default suppression window when neither the alert nor its
    /// annotations carry one.
    #[serde(default = "default_window")]
    #[serde(with = "serde_str")]
    pub default_window: Duration,

    /// Cadence of mark and suppression-cache cleanup.
    #[serde(default = "default_cleanup_interval")]
    #[serde(with = "serde_str")]
    pub cleanup_interval: Duration,

    /// How long a fingerprint stays un-enqueueable after being enqueued.
    #[serde(default = "default_duplicate_window")]
    #[serde(with = "serde_str")]
    pub duplicate_window: Duration,
}

const fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_window() -> Duration {
    Duration::from_secs(600)
}

const fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

const fn default_duplicate_window() -> Duration {
    Duration::from_secs(30)
}

/// NOC pipeline configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum NocConfigError {
    /// No endpoint configured.
    #[error("NOC endpoint is required")]
    MissingEndpoint,
}

impl NocConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint is empty.
    pub fn validate(&self) -> Result<(), NocConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(NocConfigError::MissingEndpoint);
        }
        Ok(())
    }
}
