//! Write-behind persistence against a distributed map (L2).
//!
//! The vector is the primary store; L2 only exists so a restarted instance
//! can reconcile NOC state. The [`DistributedMap`] contract is all the
//! daemon knows about the backing cluster - the production client (a
//! Hazelcast map) lives outside this crate, and tests plug in
//! [`InMemoryMap`].
//!
//! Writes are guarded by the L2 circuit breaker and retried with a linearly
//! increasing delay. The initial [`AlertStore::load_all`] is the one call
//! that bypasses the breaker: boot always gets its chance to recover.

mod writer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use argus_core::alert::Alert;
use argus_core::breaker::{CircuitBreaker, CircuitBreakerConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use writer::BatchWriter;

use crate::metrics::Metrics;

/// Name of the L2 breaker in logs and the state gauge.
pub const L2_BREAKER_NAME: &str = "l2";

/// Errors surfaced by a distributed map implementation.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// The cluster is unreachable.
    #[error("distributed map unavailable: {0}")]
    Unavailable(String),

    /// A call failed.
    #[error("distributed map operation failed: {0}")]
    Operation(String),
}

/// The distributed `string -> string` map contract.
#[async_trait]
pub trait DistributedMap: Send + Sync {
    /// Read one value.
    async fn get(&self, key: &str) -> Result<Option<String>, MapError>;

    /// Write one value.
    async fn set(&self, key: &str, value: &str) -> Result<(), MapError>;

    /// Remove one key.
    async fn remove(&self, key: &str) -> Result<(), MapError>;

    /// Read every entry.
    async fn entries(&self) -> Result<Vec<(String, String)>, MapError>;
}

/// In-process map used by tests and local mode.
#[derive(Debug, Default)]
pub struct InMemoryMap {
    entries: std::sync::Mutex<HashMap<String, String>>,
}

impl InMemoryMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a map pre-populated with the given entries.
    #[must_use]
    pub fn with_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: std::sync::Mutex::new(entries.into_iter().collect()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl DistributedMap for InMemoryMap {
    async fn get(&self, key: &str) -> Result<Option<String>, MapError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), MapError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), MapError> {
        self.lock().remove(key);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(String, String)>, MapError> {
        Ok(self.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

/// Connection retry options for the external map client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRetryConfig {
    /// Initial backoff in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

const fn default_initial_backoff_ms() -> u64 {
    1000
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for ConnectionRetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

/// Hazelcast-backed L2 options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazelcastConfig {
    /// Cluster name.
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Member addresses.
    #[serde(default)]
    pub addresses: Vec<String>,

    /// Name of the alerts map.
    #[serde(default = "default_alerts_map_name")]
    pub alerts_map_name: String,

    /// Batch writer window in milliseconds.
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,

    /// Retries per write batch after the first attempt.
    #[serde(default = "default_max_write_retries")]
    pub max_write_retries: u32,

    /// Base write retry delay in milliseconds; the delay grows linearly
    /// with the attempt number.
    #[serde(default = "default_write_retry_delay_ms")]
    pub write_retry_delay_ms: u64,

    /// Client connection retry options.
    #[serde(default)]
    pub connection_retry: ConnectionRetryConfig,

    /// L2 circuit breaker options.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// How long the client may stay disconnected before it is recreated,
    /// in milliseconds.
    #[serde(default = "default_client_recreate_threshold_ms")]
    pub client_recreate_threshold_ms: u64,
}

fn default_cluster_name() -> String {
    "argus".to_string()
}

fn default_alerts_map_name() -> String {
    "argus-alerts".to_string()
}

const fn default_batch_window_ms() -> u64 {
    2000
}

const fn default_max_write_retries() -> u32 {
    3
}

const fn default_write_retry_delay_ms() -> u64 {
    200
}

const fn default_client_recreate_threshold_ms() -> u64 {
    60_000
}

impl Default for HazelcastConfig {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
            addresses: Vec::new(),
            alerts_map_name: default_alerts_map_name(),
            batch_window_ms: default_batch_window_ms(),
            max_write_retries: default_max_write_retries(),
            write_retry_delay_ms: default_write_retry_delay_ms(),
            connection_retry: ConnectionRetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            client_recreate_threshold_ms: default_client_recreate_threshold_ms(),
        }
    }
}

/// L2 alert store: JSON-serialised alerts keyed by fingerprint.
pub struct AlertStore {
    map: Arc<dyn DistributedMap>,
    breaker: CircuitBreaker,
    metrics: Arc<Metrics>,
    max_write_retries: u32,
    write_retry_delay: Duration,
}

impl AlertStore {
    /// Create a store over the given map.
    #[must_use]
    pub fn new(map: Arc<dyn DistributedMap>, config: &HazelcastConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            map,
            breaker: CircuitBreaker::new(L2_BREAKER_NAME, config.circuit_breaker.clone()),
            metrics,
            max_write_retries: config.max_write_retries,
            write_retry_delay: Duration::from_millis(config.write_retry_delay_ms),
        }
    }

    /// The L2 circuit breaker.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Load every persisted alert. Attempted unconditionally (no circuit
    /// check); never fails - an unreachable store or a decode failure
    /// degrades to an empty or partial result.
    pub async fn load_all(&self) -> HashMap<String, Alert> {
        let entries = match self.map.entries().await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(%error, "L2 unreachable during boot load");
                self.metrics.set_l2_available(false);
                return HashMap::new();
            }
        };
        self.metrics.set_l2_available(true);

        let mut alerts = HashMap::with_capacity(entries.len());
        for (fingerprint, value) in entries {
            match serde_json::from_str::<Alert>(&value) {
                Ok(alert) => {
                    alerts.insert(fingerprint, alert);
                }
                Err(error) => {
                    tracing::warn!(
                        fingerprint = %fingerprint,
                        %error,
                        "skipping undecodable L2 record"
                    );
                }
            }
        }
        alerts
    }

    /// Persist a batch of alerts. Returns the alerts that actually reached
    /// L2; the caller clears dirty flags only for those.
    pub async fn save_batch(&self, alerts: &[Alert]) -> Vec<Alert> {
        if alerts.is_empty() {
            return Vec::new();
        }
        if !self.breaker.is_allowed() {
            if self.breaker.should_log() {
                tracing::warn!(count = alerts.len(), "L2 circuit open, deferring save batch");
            }
            return Vec::new();
        }

        let mut remaining: Vec<&Alert> = alerts.iter().collect();
        let mut persisted = Vec::with_capacity(alerts.len());
        let attempts = self.max_write_retries + 1;

        for attempt in 1..=attempts {
            let mut failed = Vec::new();
            for alert in remaining {
                let value = match serde_json::to_string(alert) {
                    Ok(value) => value,
                    Err(error) => {
                        tracing::warn!(
                            fingerprint = %alert.fingerprint,
                            %error,
                            "skipping unserialisable alert"
                        );
                        continue;
                    }
                };
                match self.map.set(&alert.fingerprint, &value).await {
                    Ok(()) => {
                        self.metrics.l2_write(true);
                        persisted.push(alert.clone());
                    }
                    Err(error) => {
                        tracing::debug!(
                            fingerprint = %alert.fingerprint,
                            attempt,
                            %error,
                            "L2 set failed"
                        );
                        failed.push(alert);
                    }
                }
            }
            remaining = failed;
            if remaining.is_empty() {
                break;
            }
            if attempt < attempts {
                tokio::time::sleep(self.write_retry_delay * attempt).await;
            }
        }

        if remaining.is_empty() {
            self.breaker.record_success();
            self.metrics.set_l2_available(true);
        } else {
            for alert in &remaining {
                self.metrics.l2_write(false);
                tracing::warn!(
                    fingerprint = %alert.fingerprint,
                    "L2 save failed after retries"
                );
            }
            self.breaker.record_failure();
            self.metrics.set_l2_available(false);
        }
        persisted
    }

    /// Remove a batch of fingerprints. Returns the fingerprints actually
    /// removed; the caller clears tombstones only for those.
    pub async fn remove_batch(&self, fingerprints: &[String]) -> Vec<String> {
        if fingerprints.is_empty() {
            return Vec::new();
        }
        if !self.breaker.is_allowed() {
            if self.breaker.should_log() {
                tracing::warn!(
                    count = fingerprints.len(),
                    "L2 circuit open, deferring remove batch"
                );
            }
            return Vec::new();
        }

        let mut remaining: Vec<&String> = fingerprints.iter().collect();
        let mut removed = Vec::with_capacity(fingerprints.len());
        let attempts = self.max_write_retries + 1;

        for attempt in 1..=attempts {
            let mut failed = Vec::new();
            for fingerprint in remaining {
                match self.map.remove(fingerprint).await {
                    Ok(()) => {
                        self.metrics.l2_write(true);
                        removed.push(fingerprint.clone());
                    }
                    Err(error) => {
                        tracing::debug!(%fingerprint, attempt, %error, "L2 remove failed");
                        failed.push(fingerprint);
                    }
                }
            }
            remaining = failed;
            if remaining.is_empty() {
                break;
            }
            if attempt < attempts {
                tokio::time::sleep(self.write_retry_delay * attempt).await;
            }
        }

        if remaining.is_empty() {
            self.breaker.record_success();
            self.metrics.set_l2_available(true);
        } else {
            for fingerprint in &remaining {
                self.metrics.l2_write(false);
                tracing::warn!(fingerprint = %fingerprint, "L2 remove failed after retries");
            }
            self.breaker.record_failure();
            self.metrics.set_l2_available(false);
        }
        removed
    }
}

impl std::fmt::Debug for AlertStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertStore")
            .field("max_write_retries", &self.max_write_retries)
            .finish_non_exhaustive()
    }
}
