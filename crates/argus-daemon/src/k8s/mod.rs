//! Kubernetes layer: pod listings, health checks and the layer service.
//!
//! The daemon never talks to the API server directly; it consumes the
//! [`PodLister`] contract, implemented outside this crate by the in-cluster
//! client and inside the test suite by fakes. Everything above that seam -
//! retry schedule, circuit breaker, the 6-step health evaluation and the
//! combined layer status - lives here.

mod checker;
mod client;
mod layer;

use std::time::Duration;

use argus_core::alert::NocBehavior;
use argus_core::breaker::CircuitBreakerConfig;
use argus_core::duration::serde_str;
use argus_core::restart::RestartTrackingConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use checker::{PodHealth, PodHealthChecker, PodHealthStatus};
#[cfg(test)]
pub(crate) use client::test_support;
pub use client::{FetchOutcome, GuardedPodClient, K8S_BREAKER_NAME};
pub use layer::{
    K8sLayerService, LayerPriority, LayerState, LayerStatus, KSM_FINGERPRINT,
    PROMETHEUS_FINGERPRINT,
};

/// One container within a pod listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerListing {
    /// Container name.
    pub name: String,
    /// Readiness probe result.
    pub ready: bool,
    /// Container state (`running`, `waiting`, `terminated`).
    pub state: String,
    /// Cumulative restart count.
    pub restart_count: u64,
}

/// One pod as returned by the API client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodListing {
    /// Pod name.
    pub name: String,
    /// Pod UID, stable across status updates.
    pub uid: String,
    /// Pod phase (`Running`, `Pending`, `Failed`, ...).
    pub phase: String,
    /// Set when the pod is being deleted.
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Container statuses.
    pub containers: Vec<ContainerListing>,
}

/// Errors surfaced by a pod lister implementation.
#[derive(Debug, thiserror::Error)]
pub enum PodListError {
    /// The API server could not be reached.
    #[error("Kubernetes API unreachable: {0}")]
    Unreachable(String),

    /// The API call failed.
    #[error("Kubernetes API error: {0}")]
    Api(String),
}

/// The pod listing contract.
#[async_trait]
pub trait PodLister: Send + Sync {
    /// List pods in `namespace` matching `label_selector`.
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodListing>, PodListError>;
}

/// Kubernetes API connection options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesConfig {
    /// Namespace holding the monitored pods.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Per-call API timeout.
    #[serde(default = "default_api_timeout")]
    #[serde(with = "serde_str")]
    pub api_timeout: Duration,

    /// Whether the production client loads in-cluster credentials.
    #[serde(default = "default_use_in_cluster_config")]
    pub use_in_cluster_config: bool,
}

fn default_namespace() -> String {
    "monitoring".to_string()
}

const fn default_api_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_use_in_cluster_config() -> bool {
    true
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            api_timeout: default_api_timeout(),
            use_in_cluster_config: default_use_in_cluster_config(),
        }
    }
}

/// Options for one monitored pod (the Prometheus or KSM deployment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodCheckConfig {
    /// Label selector identifying the pod.
    pub label_selector: String,

    /// Container whose readiness and state are evaluated.
    pub container_name: String,

    /// NOC behaviour attached to CREATE alerts for this pod.
    #[serde(default)]
    pub create_noc_behavior: NocBehavior,

    /// NOC behaviour attached to UNKNOWN alerts for this pod.
    #[serde(default)]
    pub unknown_noc_behavior: NocBehavior,
}

/// API retry schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first failed call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay schedule in milliseconds; the last entry repeats when the
    /// schedule is shorter than the retry count.
    #[serde(default = "default_delay_milliseconds")]
    pub delay_milliseconds: Vec<u64>,
}

const fn default_max_retries() -> u32 {
    2
}

fn default_delay_milliseconds() -> Vec<u64> {
    vec![200, 500]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_milliseconds: default_delay_milliseconds(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let index = (attempt.saturating_sub(1)) as usize;
        let millis = self
            .delay_milliseconds
            .get(index)
            .or_else(|| self.delay_milliseconds.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(millis)
    }
}

/// Full Kubernetes layer options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K8sLayerConfig {
    /// API connection options.
    #[serde(default)]
    pub kubernetes: KubernetesConfig,

    /// Prometheus pod check.
    pub prometheus_pod: PodCheckConfig,

    /// kube-state-metrics pod check.
    pub ksm_pod: PodCheckConfig,

    /// API retry schedule.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Kubernetes breaker options.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Restart storm detection options.
    #[serde(default)]
    pub restart_tracking: RestartTrackingConfig,

    /// Poll cadence.
    #[serde(default = "default_polling_interval")]
    #[serde(with = "serde_str")]
    pub polling_interval: Duration,
}

const fn default_polling_interval() -> Duration {
    Duration::from_secs(30)
}

/// Build a pod listing for tests and fakes.
#[must_use]
pub fn running_pod(name: &str, container: &str, restart_count: u64) -> PodListing {
    PodListing {
        name: name.to_string(),
        uid: format!("{name}-uid"),
        phase: "Running".to_string(),
        deletion_timestamp: None,
        containers: vec![ContainerListing {
            name: container.to_string(),
            ready: true,
            state: "running".to_string(),
            restart_count,
        }],
    }
}
