//! The Kubernetes layer service.
//!
//! Checks the Prometheus and kube-state-metrics pods in parallel, derives a
//! combined layer status, and always emits the two fixed-fingerprint alerts
//! so the vector holds a current verdict for both pods on every poll.

use std::sync::{Arc, Mutex};

use argus_core::alert::{
    Alert, AlertStatus, NocBehavior, PRIORITY_KSM_DOWN, PRIORITY_PROMETHEUS_DOWN,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{K8sLayerConfig, PodCheckConfig, PodHealth, PodHealthChecker, PodHealthStatus};

/// Fingerprint of the Prometheus layer alert.
pub const PROMETHEUS_FINGERPRINT: &str = "k8s-layer-prometheus";

/// Fingerprint of the kube-state-metrics layer alert.
pub const KSM_FINGERPRINT: &str = "k8s-layer-ksm";

/// Combined layer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerStatus {
    /// Both pods healthy.
    Healthy,
    /// Metrics collection degraded but alerting alive.
    Degraded,
    /// KSM state unknown while Prometheus is alive.
    Partial,
    /// Prometheus state unknown.
    Unknown,
    /// Prometheus down or unstable.
    Critical,
}

impl std::fmt::Display for LayerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Partial => write!(f, "partial"),
            Self::Unknown => write!(f, "unknown"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Urgency attached to the combined status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerPriority {
    /// Nothing to report.
    None,
    /// Routine attention.
    Normal,
    /// Prompt attention.
    High,
    /// Immediate attention.
    Critical,
}

/// Result of one layer poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerState {
    /// Combined status.
    pub status: LayerStatus,
    /// Combined urgency.
    pub priority: LayerPriority,
    /// Prometheus pod verdict.
    pub prometheus: PodHealth,
    /// kube-state-metrics pod verdict.
    pub ksm: PodHealth,
    /// When the poll completed.
    pub checked_at: DateTime<Utc>,
}

/// Derive the combined status and priority from the two pod verdicts.
#[must_use]
fn combine(prometheus: PodHealthStatus, ksm: PodHealthStatus) -> (LayerStatus, LayerPriority) {
    use PodHealthStatus as P;
    match (prometheus, ksm) {
        (P::Down | P::Unstable, _) => (LayerStatus::Critical, LayerPriority::Critical),
        (P::Unknown, _) => (LayerStatus::Unknown, LayerPriority::Critical),
        (P::Healthy, P::Down) => (LayerStatus::Degraded, LayerPriority::High),
        (P::Healthy, P::Unknown) => (LayerStatus::Partial, LayerPriority::High),
        (P::Healthy, P::Unstable) => (LayerStatus::Degraded, LayerPriority::Normal),
        (P::Healthy, P::Healthy) => (LayerStatus::Healthy, LayerPriority::None),
    }
}

/// Orchestrates the parallel pod checks and produces the layer alerts.
#[derive(Debug)]
pub struct K8sLayerService {
    checker: PodHealthChecker,
    config: K8sLayerConfig,
    last_state: Mutex<Option<LayerState>>,
}

impl K8sLayerService {
    /// Create the service.
    #[must_use]
    pub fn new(checker: PodHealthChecker, config: K8sLayerConfig) -> Arc<Self> {
        Arc::new(Self {
            checker,
            config,
            last_state: Mutex::new(None),
        })
    }

    /// Layer configuration.
    #[must_use]
    pub fn config(&self) -> &K8sLayerConfig {
        &self.config
    }

    /// The Kubernetes circuit breaker.
    #[must_use]
    pub fn breaker(&self) -> &argus_core::breaker::CircuitBreaker {
        self.checker.client().breaker()
    }

    /// Run both pod checks in parallel and derive the combined state.
    pub async fn get_state(&self, correlation_id: &str) -> LayerState {
        let (prometheus, ksm) = tokio::join!(
            self.checker.check(&self.config.prometheus_pod),
            self.checker.check(&self.config.ksm_pod),
        );

        let (status, priority) = combine(prometheus.status, ksm.status);
        let state = LayerState {
            status,
            priority,
            prometheus,
            ksm,
            checked_at: Utc::now(),
        };

        tracing::info!(
            correlation_id = %correlation_id,
            status = %state.status,
            prometheus = %state.prometheus.status,
            ksm = %state.ksm.status,
            "k8s layer polled"
        );

        *self.lock() = Some(state.clone());
        state
    }

    /// Most recent poll result, for the HTTP state endpoints.
    pub fn last_state(&self) -> Option<LayerState> {
        self.lock().clone()
    }

    /// Build the two layer alerts for a poll result. Both alerts are always
    /// emitted; a healthy pod produces an IGNORE that keeps the vector entry
    /// fresh.
    #[must_use]
    pub fn generate_alerts(&self, state: &LayerState, execution_id: &str) -> [Alert; 2] {
        [
            self.pod_alert(
                &state.prometheus,
                &self.config.prometheus_pod,
                PROMETHEUS_FINGERPRINT,
                PRIORITY_PROMETHEUS_DOWN,
                "Prometheus",
                execution_id,
            ),
            self.pod_alert(
                &state.ksm,
                &self.config.ksm_pod,
                KSM_FINGERPRINT,
                PRIORITY_KSM_DOWN,
                "kube-state-metrics",
                execution_id,
            ),
        ]
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<LayerState>> {
        self.last_state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn pod_alert(
        &self,
        health: &PodHealth,
        check: &PodCheckConfig,
        fingerprint: &str,
        priority: i64,
        display_name: &str,
        execution_id: &str,
    ) -> Alert {
        let (status, behavior, summary) = match health.status {
            PodHealthStatus::Healthy => (
                AlertStatus::Ignore,
                NocBehavior::default(),
                format!("{display_name} pod healthy"),
            ),
            PodHealthStatus::Unknown => (
                AlertStatus::Unknown,
                check.unknown_noc_behavior.clone(),
                format!(
                    "{display_name} pod state unknown: {}",
                    health.reason.as_deref().unwrap_or("no reason")
                ),
            ),
            PodHealthStatus::Down | PodHealthStatus::Unstable => (
                AlertStatus::Create,
                check.create_noc_behavior.clone(),
                format!(
                    "{display_name} pod {}: {}",
                    health.status,
                    health.reason.as_deref().unwrap_or("no reason")
                ),
            ),
        };

        let now = Utc::now();
        Alert {
            priority,
            name: format!("K8sLayer{display_name}"),
            summary,
            description: health.reason.clone().unwrap_or_default(),
            payload: behavior.payload,
            source: "k8s_layer".to_string(),
            fingerprint: fingerprint.to_string(),
            status,
            send_to_noc: behavior.send_to_noc,
            suppress_window: behavior.suppress_window,
            timestamp: now,
            last_seen: now,
            annotations: std::collections::BTreeMap::new(),
            execution_id: execution_id.to_string(),
            prometheus: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use argus_core::breaker::CircuitBreakerConfig;
    use argus_core::restart::{RestartTracker, RestartTrackingConfig};

    use super::super::client::test_support::FakeLister;
    use super::super::{
        running_pod, GuardedPodClient, KubernetesConfig, RetryConfig,
    };
    use super::*;

    fn layer_config() -> K8sLayerConfig {
        K8sLayerConfig {
            kubernetes: KubernetesConfig::default(),
            prometheus_pod: PodCheckConfig {
                label_selector: "app=prometheus".to_string(),
                container_name: "prometheus".to_string(),
                create_noc_behavior: NocBehavior {
                    send_to_noc: true,
                    payload: "prom-create".to_string(),
                    suppress_window: Some(Duration::from_secs(600)),
                },
                unknown_noc_behavior: NocBehavior {
                    send_to_noc: true,
                    payload: "prom-unknown".to_string(),
                    suppress_window: None,
                },
            },
            ksm_pod: PodCheckConfig {
                label_selector: "app=ksm".to_string(),
                container_name: "ksm".to_string(),
                create_noc_behavior: NocBehavior::default(),
                unknown_noc_behavior: NocBehavior::default(),
            },
            retry: RetryConfig {
                max_retries: 0,
                delay_milliseconds: vec![],
            },
            circuit_breaker: CircuitBreakerConfig::default(),
            restart_tracking: RestartTrackingConfig::default(),
            polling_interval: Duration::from_secs(30),
        }
    }

    fn service(lister: Arc<FakeLister>) -> Arc<K8sLayerService> {
        let config = layer_config();
        let client = Arc::new(GuardedPodClient::new(
            lister,
            config.kubernetes.namespace.clone(),
            Duration::from_millis(200),
            config.retry.clone(),
            config.circuit_breaker.clone(),
        ));
        let restarts = Arc::new(RestartTracker::new(config.restart_tracking.clone(), false));
        K8sLayerService::new(PodHealthChecker::new(client, restarts), config)
    }

    #[test]
    fn test_combine_table() {
        use LayerPriority as LP;
        use LayerStatus as LS;
        use PodHealthStatus as P;

        assert_eq!(combine(P::Down, P::Healthy), (LS::Critical, LP::Critical));
        assert_eq!(combine(P::Unstable, P::Down), (LS::Critical, LP::Critical));
        assert_eq!(combine(P::Unknown, P::Healthy), (LS::Unknown, LP::Critical));
        assert_eq!(combine(P::Healthy, P::Down), (LS::Degraded, LP::High));
        assert_eq!(combine(P::Healthy, P::Unknown), (LS::Partial, LP::High));
        assert_eq!(combine(P::Healthy, P::Unstable), (LS::Degraded, LP::Normal));
        assert_eq!(combine(P::Healthy, P::Healthy), (LS::Healthy, LP::None));
    }

    #[tokio::test]
    async fn test_healthy_poll_emits_two_ignores() {
        // Both selectors resolve through one fake; a pod carrying both
        // container names satisfies either check.
        let mut pod = running_pod("shared-0", "prometheus", 0);
        pod.containers.push(super::super::ContainerListing {
            name: "ksm".to_string(),
            ready: true,
            state: "running".to_string(),
            restart_count: 0,
        });
        let service = service(Arc::new(FakeLister::with_pods(vec![pod])));

        let state = service.get_state("poll-test0001").await;
        assert_eq!(state.status, LayerStatus::Healthy);

        let alerts = service.generate_alerts(&state, "exec-test0001");
        assert_eq!(alerts[0].fingerprint, PROMETHEUS_FINGERPRINT);
        assert_eq!(alerts[0].priority, PRIORITY_PROMETHEUS_DOWN);
        assert_eq!(alerts[0].status, AlertStatus::Ignore);
        assert_eq!(alerts[1].fingerprint, KSM_FINGERPRINT);
        assert_eq!(alerts[1].priority, PRIORITY_KSM_DOWN);
        assert_eq!(alerts[1].status, AlertStatus::Ignore);
    }

    #[tokio::test]
    async fn test_failed_prometheus_is_critical_create() {
        let mut pod = running_pod("prometheus-0", "prometheus", 0);
        pod.phase = "Failed".to_string();
        let service = service(Arc::new(FakeLister::with_pods(vec![pod])));

        let state = service.get_state("poll-test0002").await;
        assert_eq!(state.status, LayerStatus::Critical);
        assert_eq!(state.priority, LayerPriority::Critical);

        let alerts = service.generate_alerts(&state, "exec-test0002");
        assert_eq!(alerts[0].status, AlertStatus::Create);
        assert_eq!(alerts[0].payload, "prom-create");
        assert_eq!(
            alerts[0].suppress_window,
            Some(Duration::from_secs(600))
        );
        // The KSM check against the same failed pod also produces a CREATE.
        assert_eq!(alerts[1].status, AlertStatus::Create);
    }

    #[tokio::test]
    async fn test_api_outage_is_unknown_with_behavior() {
        let lister = Arc::new(FakeLister::default());
        lister.set_fail(true);
        let service = service(lister);

        let state = service.get_state("poll-test0003").await;
        assert_eq!(state.status, LayerStatus::Unknown);

        let alerts = service.generate_alerts(&state, "exec-test0003");
        assert_eq!(alerts[0].status, AlertStatus::Unknown);
        assert_eq!(alerts[0].payload, "prom-unknown");
    }

    #[tokio::test]
    async fn test_last_state_is_cached() {
        let mut pod = running_pod("shared-0", "prometheus", 0);
        pod.containers.push(super::super::ContainerListing {
            name: "ksm".to_string(),
            ready: true,
            state: "running".to_string(),
            restart_count: 0,
        });
        let service = service(Arc::new(FakeLister::with_pods(vec![pod])));

        assert!(service.last_state().is_none());
        service.get_state("poll-test0004").await;
        assert_eq!(service.last_state().unwrap().status, LayerStatus::Healthy);
    }
}
