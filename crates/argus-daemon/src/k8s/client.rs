//! Retry and circuit-breaker wrapper over the pod lister.

use std::sync::Arc;
use std::time::Duration;

use argus_core::breaker::{CircuitBreaker, CircuitBreakerConfig};

use super::{PodLister, PodListing, RetryConfig};

/// Name of the Kubernetes breaker in logs and the state gauge.
pub const K8S_BREAKER_NAME: &str = "k8s";

/// Outcome of a guarded pod fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The API answered; the listing may be empty.
    Listed(Vec<PodListing>),
    /// The API could not be used (circuit open, timeout, retries exhausted).
    Unavailable(String),
}

/// Pod lister wrapped with timeout, retry schedule and circuit breaker.
pub struct GuardedPodClient {
    lister: Arc<dyn PodLister>,
    breaker: CircuitBreaker,
    namespace: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl GuardedPodClient {
    /// Create a guarded client.
    #[must_use]
    pub fn new(
        lister: Arc<dyn PodLister>,
        namespace: impl Into<String>,
        timeout: Duration,
        retry: RetryConfig,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            lister,
            breaker: CircuitBreaker::new(K8S_BREAKER_NAME, breaker_config),
            namespace: namespace.into(),
            timeout,
            retry,
        }
    }

    /// The Kubernetes circuit breaker.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Fetch pods for a selector.
    ///
    /// An open circuit skips the call entirely. Transient failures are
    /// retried per the schedule; exhaustion records one breaker failure and
    /// reports the API unavailable.
    pub async fn fetch(&self, label_selector: &str) -> FetchOutcome {
        if !self.breaker.is_allowed() {
            if self.breaker.should_log() {
                tracing::warn!(selector = %label_selector, "Kubernetes circuit open, skipping poll");
            }
            return FetchOutcome::Unavailable("Kubernetes API unavailable".to_string());
        }

        let attempts = self.retry.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match tokio::time::timeout(
                self.timeout,
                self.lister.list_pods(&self.namespace, label_selector),
            )
            .await
            {
                Ok(Ok(pods)) => {
                    self.breaker.record_success();
                    return FetchOutcome::Listed(pods);
                }
                Ok(Err(error)) => {
                    last_error = error.to_string();
                }
                Err(_) => {
                    last_error = format!("timed out after {:?}", self.timeout);
                }
            }

            tracing::debug!(
                selector = %label_selector,
                attempt,
                error = %last_error,
                "pod listing attempt failed"
            );
            if attempt < attempts {
                tokio::time::sleep(self.retry.delay(attempt)).await;
            }
        }

        self.breaker.record_failure();
        tracing::warn!(
            selector = %label_selector,
            error = %last_error,
            "pod listing failed after retries"
        );
        FetchOutcome::Unavailable("Kubernetes API unavailable".to_string())
    }
}

impl std::fmt::Debug for GuardedPodClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedPodClient")
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
