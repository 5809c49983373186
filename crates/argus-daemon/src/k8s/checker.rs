//! The 6-step pod liveness check.
//!
//! Evaluated in order against the first pod matching the selector: the pod
//! exists, its phase is Running, it is not being deleted, the target
//! container is ready, the container state is running, and the restart
//! window is stable. The first five failing yield **Down**; an unstable
//! restart window yields **Unstable**; an unusable API yields **Unknown**.

use std::sync::Arc;

use argus_core::restart::RestartTracker;
use serde::{Deserialize, Serialize};

use super::{FetchOutcome, GuardedPodClient, PodCheckConfig};

/// Health classification for one monitored pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodHealthStatus {
    /// All six checks passed.
    Healthy,
    /// One of the existence/phase/readiness checks failed.
    Down,
    /// Restart storm detected.
    Unstable,
    /// The API could not answer.
    Unknown,
}

impl std::fmt::Display for PodHealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Down => write!(f, "down"),
            Self::Unstable => write!(f, "unstable"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of one pod health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodHealth {
    /// Classification.
    pub status: PodHealthStatus,
    /// Precise reason when not healthy.
    pub reason: Option<String>,
}

impl PodHealth {
    /// All checks passed.
    #[must_use]
    pub const fn healthy() -> Self {
        Self {
            status: PodHealthStatus::Healthy,
            reason: None,
        }
    }

    /// A liveness check failed.
    #[must_use]
    pub fn down(reason: impl Into<String>) -> Self {
        Self {
            status: PodHealthStatus::Down,
            reason: Some(reason.into()),
        }
    }

    /// Restart storm detected.
    #[must_use]
    pub fn unstable(reason: impl Into<String>) -> Self {
        Self {
            status: PodHealthStatus::Unstable,
            reason: Some(reason.into()),
        }
    }

    /// The API could not answer.
    #[must_use]
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            status: PodHealthStatus::Unknown,
            reason: Some(reason.into()),
        }
    }
}

/// Runs the 6-step check through the guarded client.
#[derive(Debug)]
pub struct PodHealthChecker {
    client: Arc<GuardedPodClient>,
    restarts: Arc<RestartTracker>,
}

impl PodHealthChecker {
    /// Create a checker.
    #[must_use]
    pub fn new(client: Arc<GuardedPodClient>, restarts: Arc<RestartTracker>) -> Self {
        Self { client, restarts }
    }

    /// The guarded client, for breaker state reporting.
    #[must_use]
    pub fn client(&self) -> &Arc<GuardedPodClient> {
        &self.client
    }

    /// Evaluate one monitored pod.
    pub async fn check(&self, check: &PodCheckConfig) -> PodHealth {
        let pods = match self.client.fetch(&check.label_selector).await {
            FetchOutcome::Listed(pods) => pods,
            FetchOutcome::Unavailable(reason) => return PodHealth::unknown(reason),
        };

        // Step 1: pod exists.
        let Some(pod) = pods.first() else {
            return PodHealth::down(format!(
                "no pod matches selector '{}'",
                check.label_selector
            ));
        };

        // Step 2: pod phase.
        if pod.phase != "Running" {
            return PodHealth::down(format!("pod '{}' phase is {}", pod.name, pod.phase));
        }

        // Step 3: not terminating.
        if pod.deletion_timestamp.is_some() {
            return PodHealth::down(format!("pod '{}' is terminating", pod.name));
        }

        // Step 4: target container ready.
        let Some(container) = pod.containers.iter().find(|c| c.name == check.container_name)
        else {
            return PodHealth::down(format!(
                "container '{}' not present in pod '{}'",
                check.container_name, pod.name
            ));
        };
        if !container.ready {
            return PodHealth::down(format!(
                "container '{}' is not ready",
                check.container_name
            ));
        }

        // Step 5: container state.
        if container.state != "running" {
            return PodHealth::down(format!(
                "container '{}' state is {}",
                check.container_name, container.state
            ));
        }

        // Step 6: restart stability.
        let observation = self.restarts.observe(&pod.uid, container.restart_count);
        if !observation.stable {
            return PodHealth::unstable(format!(
                "{} restarts within the tracking window",
                observation.restarts_in_window
            ));
        }

        PodHealth::healthy()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use argus_core::alert::NocBehavior;
    use argus_core::breaker::CircuitBreakerConfig;
    use argus_core::restart::RestartTrackingConfig;

    use super::super::client::test_support::FakeLister;
    use super::super::{running_pod, RetryConfig};
    use super::*;

    fn check_config() -> PodCheckConfig {
        PodCheckConfig {
            label_selector: "app=prometheus".to_string(),
            container_name: "prometheus".to_string(),
            create_noc_behavior: NocBehavior::default(),
            unknown_noc_behavior: NocBehavior::default(),
        }
    }

    fn checker(lister: Arc<FakeLister>) -> PodHealthChecker {
        let client = Arc::new(GuardedPodClient::new(
            lister,
            "monitoring",
            Duration::from_millis(200),
            RetryConfig {
                max_retries: 0,
                delay_milliseconds: vec![],
            },
            CircuitBreakerConfig::default(),
        ));
        let restarts = Arc::new(RestartTracker::new(
            RestartTrackingConfig {
                window_size: 2,
                restart_threshold: 2,
                normal_grace_period: Duration::from_secs(0),
            },
            false,
        ));
        PodHealthChecker::new(client, restarts)
    }

    #[tokio::test]
    async fn test_healthy_pod() {
        let lister = Arc::new(FakeLister::with_pods(vec![running_pod(
            "prometheus-0",
            "prometheus",
            0,
        )]));
        let checker = checker(lister);
        let health = checker.check(&check_config()).await;
        assert_eq!(health.status, PodHealthStatus::Healthy);
        assert!(health.reason.is_none());
    }

    #[tokio::test]
    async fn test_missing_pod_is_down() {
        let checker = checker(Arc::new(FakeLister::default()));
        let health = checker.check(&check_config()).await;
        assert_eq!(health.status, PodHealthStatus::Down);
        assert!(health.reason.unwrap().contains("no pod matches"));
    }

    #[tokio::test]
    async fn test_failed_phase_is_down() {
        let mut pod = running_pod("prometheus-0", "prometheus", 0);
        pod.phase = "Failed".to_string();
        let checker = checker(Arc::new(FakeLister::with_pods(vec![pod])));
        let health = checker.check(&check_config()).await;
        assert_eq!(health.status, PodHealthStatus::Down);
        assert!(health.reason.unwrap().contains("phase is Failed"));
    }

    #[tokio::test]
    async fn test_terminating_pod_is_down() {
        let mut pod = running_pod("prometheus-0", "prometheus", 0);
        pod.deletion_timestamp = Some(chrono::Utc::now());
        let checker = checker(Arc::new(FakeLister::with_pods(vec![pod])));
        let health = checker.check(&check_config()).await;
        assert_eq!(health.status, PodHealthStatus::Down);
        assert!(health.reason.unwrap().contains("terminating"));
    }

    #[tokio::test]
    async fn test_unready_container_is_down() {
        let mut pod = running_pod("prometheus-0", "prometheus", 0);
        pod.containers[0].ready = false;
        let checker = checker(Arc::new(FakeLister::with_pods(vec![pod])));
        let health = checker.check(&check_config()).await;
        assert_eq!(health.status, PodHealthStatus::Down);
        assert!(health.reason.unwrap().contains("not ready"));
    }

    #[tokio::test]
    async fn test_waiting_container_is_down() {
        let mut pod = running_pod("prometheus-0", "prometheus", 0);
        pod.containers[0].state = "waiting".to_string();
        let checker = checker(Arc::new(FakeLister::with_pods(vec![pod])));
        let health = checker.check(&check_config()).await;
        assert_eq!(health.status, PodHealthStatus::Down);
        assert!(health.reason.unwrap().contains("state is waiting"));
    }

    #[tokio::test]
    async fn test_missing_container_is_down() {
        let mut pod = running_pod("prometheus-0", "prometheus", 0);
        pod.containers[0].name = "sidecar".to_string();
        let checker = checker(Arc::new(FakeLister::with_pods(vec![pod])));
        let health = checker.check(&check_config()).await;
        assert_eq!(health.status, PodHealthStatus::Down);
        assert!(health.reason.unwrap().contains("not present"));
    }

    #[tokio::test]
    async fn test_restart_storm_is_unstable() {
        let lister = Arc::new(FakeLister::with_pods(vec![running_pod(
            "prometheus-0",
            "prometheus",
            0,
        )]));
        let checker = checker(Arc::clone(&lister));

        assert_eq!(
            checker.check(&check_config()).await.status,
            PodHealthStatus::Healthy
        );

        lister.set_pods(vec![running_pod("prometheus-0", "prometheus", 4)]);
        let health = checker.check(&check_config()).await;
        assert_eq!(health.status, PodHealthStatus::Unstable);
        assert!(health.reason.unwrap().contains("restarts"));
    }

    #[tokio::test]
    async fn test_api_failure_is_unknown() {
        let lister = Arc::new(FakeLister::default());
        lister.set_fail(true);
        let checker = checker(lister);
        let health = checker.check(&check_config()).await;
        assert_eq!(health.status, PodHealthStatus::Unknown);
        assert_eq!(health.reason.as_deref(), Some("Kubernetes API unavailable"));
    }
}
