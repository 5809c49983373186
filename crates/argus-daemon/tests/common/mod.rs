//! Shared fixture for the end-to-end daemon tests: a full pipeline over an
//! in-process distributed map, a selector-aware fake pod lister and a
//! recording NOC dispatcher.

#![allow(dead_code)] // each test binary uses a different slice of the harness

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use argus_core::alert::NocBehavior;
use argus_core::breaker::CircuitBreakerConfig;
use argus_core::noc::NocMessage;
use argus_core::restart::{RestartTracker, RestartTrackingConfig};
use argus_core::watchdog::WatchdogConfig;
use argus_daemon::coordinator::{Coordinator, CoordinatorConfig};
use argus_daemon::k8s::{
    ContainerListing, GuardedPodClient, K8sLayerConfig, KubernetesConfig, PodCheckConfig,
    PodHealthChecker, PodListError, PodLister, PodListing, K8sLayerService, RetryConfig,
};
use argus_daemon::metrics::Metrics;
use argus_daemon::noc::{
    NocDispatcher, NocQueue, NocSendError, NocWorker, SnapshotService, SuppressionCache,
};
use argus_daemon::persistence::{AlertStore, BatchWriter, HazelcastConfig, InMemoryMap};
use argus_daemon::vector::AlertsVector;
use argus_daemon::watchdog::WatchdogService;
use async_trait::async_trait;
use tokio::sync::watch;

/// Label selector used for the Prometheus pod in tests.
pub const PROM_SELECTOR: &str = "app=prometheus";

/// Label selector used for the KSM pod in tests.
pub const KSM_SELECTOR: &str = "app=kube-state-metrics";

/// Pod lister answering per label selector.
#[derive(Debug, Default)]
pub struct SelectorLister {
    pods: Mutex<HashMap<String, Vec<PodListing>>>,
}

impl SelectorLister {
    pub fn set(&self, selector: &str, pods: Vec<PodListing>) {
        self.pods.lock().unwrap().insert(selector.to_string(), pods);
    }
}

#[async_trait]
impl PodLister for SelectorLister {
    async fn list_pods(
        &self,
        _namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodListing>, PodListError> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(label_selector)
            .cloned()
            .unwrap_or_default())
    }
}

/// NOC dispatcher that records every message.
#[derive(Debug, Default)]
pub struct RecordingNoc {
    pub sent: Mutex<Vec<NocMessage>>,
    pub failing: AtomicBool,
}

impl RecordingNoc {
    pub fn messages(&self) -> Vec<NocMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NocDispatcher for RecordingNoc {
    async fn post(&self, message: &NocMessage) -> Result<(), NocSendError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(NocSendError::Status(500));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Build a healthy running pod for a container name.
pub fn healthy_pod(name: &str, container: &str) -> PodListing {
    PodListing {
        name: name.to_string(),
        uid: format!("{name}-uid"),
        phase: "Running".to_string(),
        deletion_timestamp: None,
        containers: vec![ContainerListing {
            name: container.to_string(),
            ready: true,
            state: "running".to_string(),
            restart_count: 0,
        }],
    }
}

/// The assembled pipeline.
pub struct Harness {
    pub metrics: Arc<Metrics>,
    pub vector: Arc<AlertsVector>,
    pub store: Arc<AlertStore>,
    pub queue: Arc<NocQueue>,
    pub lister: Arc<SelectorLister>,
    pub noc: Arc<RecordingNoc>,
    pub coordinator: Arc<Coordinator>,
    pub k8s: Arc<K8sLayerService>,
    pub watchdog: Arc<WatchdogService>,
    pub writer: BatchWriter,
    pub shutdown_tx: watch::Sender<bool>,
    worker_task: tokio::task::JoinHandle<()>,
}

/// Options the individual tests tweak.
pub struct HarnessOptions {
    pub l2_seed: Vec<(String, String)>,
    pub default_window: Duration,
    pub duplicate_window: Duration,
    pub watchdog: WatchdogConfig,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            l2_seed: Vec::new(),
            default_window: Duration::from_secs(600),
            duplicate_window: Duration::ZERO,
            watchdog: WatchdogConfig {
                normal_grace_period: Duration::ZERO,
                crash_recovery_grace_period: Duration::ZERO,
                ..Default::default()
            },
        }
    }
}

impl Harness {
    pub async fn start(options: HarnessOptions) -> Self {
        let metrics = Metrics::new().unwrap();
        let map = Arc::new(InMemoryMap::with_entries(options.l2_seed));
        let store = Arc::new(AlertStore::new(
            map,
            &HazelcastConfig::default(),
            Arc::clone(&metrics),
        ));
        let vector = Arc::new(AlertsVector::new(
            Duration::from_secs(3600),
            Arc::clone(&metrics),
        ));
        let crash_recovery = vector.initialize_from_l2(&store).await;

        let lister = Arc::new(SelectorLister::default());
        let pod_client = Arc::new(GuardedPodClient::new(
            Arc::clone(&lister) as Arc<dyn PodLister>,
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
                window_size: 5,
                restart_threshold: 3,
                normal_grace_period: Duration::ZERO,
            },
            crash_recovery,
        ));
        let k8s = K8sLayerService::new(
            PodHealthChecker::new(pod_client, restarts),
            layer_config(),
        );

        let queue = NocQueue::new(options.duplicate_window);
        let suppression = Arc::new(SuppressionCache::new(options.default_window));
        let noc = Arc::new(RecordingNoc::default());
        let snapshots = Arc::new(SnapshotService::new(
            Arc::clone(&vector),
            Arc::clone(&queue),
            Arc::clone(&metrics),
        ));
        let watchdog = WatchdogService::new(options.watchdog, crash_recovery, Arc::clone(&vector));
        let coordinator = Coordinator::new(
            Arc::clone(&vector),
            snapshots,
            Arc::clone(&k8s),
            Arc::clone(&watchdog),
            Arc::clone(&metrics),
            CoordinatorConfig::default(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = NocWorker::new(
            Arc::clone(&queue),
            Arc::clone(&vector),
            suppression,
            Arc::clone(&noc) as Arc<dyn NocDispatcher>,
            Arc::clone(&metrics),
            Duration::from_secs(60),
        );
        let worker_task = tokio::spawn(worker.run(shutdown_rx));

        let writer = BatchWriter::new(
            Arc::clone(&vector),
            Arc::clone(&store),
            Duration::from_millis(10),
        );

        Self {
            metrics,
            vector,
            store,
            queue,
            lister,
            noc,
            coordinator,
            k8s,
            watchdog,
            writer,
            shutdown_tx,
            worker_task,
        }
    }

    /// Let the worker catch up with queued decisions.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.worker_task.await;
    }
}

fn layer_config() -> K8sLayerConfig {
    K8sLayerConfig {
        kubernetes: KubernetesConfig::default(),
        prometheus_pod: PodCheckConfig {
            label_selector: PROM_SELECTOR.to_string(),
            container_name: "prometheus".to_string(),
            create_noc_behavior: NocBehavior {
                send_to_noc: true,
                payload: "layer-create".to_string(),
                suppress_window: None,
            },
            unknown_noc_behavior: NocBehavior {
                send_to_noc: true,
                payload: "layer-unknown".to_string(),
                suppress_window: None,
            },
        },
        ksm_pod: PodCheckConfig {
            label_selector: KSM_SELECTOR.to_string(),
            container_name: "kube-state-metrics".to_string(),
            create_noc_behavior: NocBehavior {
                send_to_noc: true,
                payload: "layer-create".to_string(),
                suppress_window: None,
            },
            unknown_noc_behavior: NocBehavior {
                send_to_noc: true,
                payload: "layer-unknown".to_string(),
                suppress_window: None,
            },
        },
        retry: RetryConfig {
            max_retries: 0,
            delay_milliseconds: vec![],
        },
        circuit_breaker: CircuitBreakerConfig::default(),
        restart_tracking: RestartTrackingConfig {
            window_size: 5,
            restart_threshold: 3,
            normal_grace_period: Duration::ZERO,
        },
        polling_interval: Duration::from_secs(60),
    }
}
