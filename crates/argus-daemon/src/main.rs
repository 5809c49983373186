//! argus-daemon - alert aggregation and NOC dispatch.
//!
//! Boot order matters: the L2 load decides whether this is a crash-recovery
//! boot before any source starts, and every long-running task hangs off one
//! shutdown channel so SIGTERM drains the batch writer before the process
//! exits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use argus_core::restart::RestartTracker;
use argus_daemon::config::DaemonConfig;
use argus_daemon::coordinator::{Coordinator, CoordinatorConfig};
use argus_daemon::http::{self, AppState};
use argus_daemon::k8s::{
    GuardedPodClient, K8sLayerService, PodHealthChecker, PodListError, PodLister, PodListing,
    K8S_BREAKER_NAME,
};
use argus_daemon::metrics::Metrics;
use argus_daemon::noc::{
    NocDispatcher, NocHttpClient, NocQueue, NocWorker, SnapshotService, SuppressionCache,
};
use argus_daemon::persistence::{
    AlertStore, BatchWriter, DistributedMap, InMemoryMap, L2_BREAKER_NAME,
};
use argus_daemon::vector::AlertsVector;
use argus_daemon::watchdog::WatchdogService;
use async_trait::async_trait;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// argus daemon - Kubernetes-resident alert aggregator
#[derive(Parser, Debug)]
#[command(name = "argus-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the daemon configuration file
    #[arg(short, long, default_value = "argus.toml")]
    config: PathBuf,
}

/// Stand-in until the in-cluster client is linked in: reports the API
/// unavailable, which the layer maps to UNKNOWN.
#[derive(Debug)]
struct UnlinkedPodLister;

#[async_trait]
impl PodLister for UnlinkedPodLister {
    async fn list_pods(
        &self,
        _namespace: &str,
        _label_selector: &str,
    ) -> Result<Vec<PodListing>, PodListError> {
        Err(PodListError::Unreachable(
            "no Kubernetes client linked".to_string(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = DaemonConfig::load(&args.config)
        .with_context(|| format!("failed to load config from {:?}", args.config))?;

    if let Ok(endpoint) = std::env::var("OPENTELEMETRY_COLLECTOR_ENDPOINT")
        .or_else(|_| std::env::var("OpenTelemetry:CollectorEndpoint"))
    {
        info!(endpoint = %endpoint, "telemetry collector endpoint configured");
    }

    let metrics = Metrics::new().context("failed to build metrics registry")?;

    // L2. The Hazelcast client is provided by the deployment; without one
    // the daemon keeps its write-behind in process.
    if !config.hazelcast.addresses.is_empty() {
        warn!(
            addresses = ?config.hazelcast.addresses,
            "no distributed map client linked, write-behind stays in process"
        );
    }
    let map: Arc<dyn DistributedMap> = Arc::new(InMemoryMap::new());
    let store = Arc::new(AlertStore::new(
        map,
        &config.hazelcast,
        Arc::clone(&metrics),
    ));

    let vector = Arc::new(AlertsVector::new(
        config.alerts_vector.alert_ttl,
        Arc::clone(&metrics),
    ));
    let crash_recovery = vector.initialize_from_l2(&store).await;
    metrics.set_breaker_state(L2_BREAKER_NAME, store.breaker().state_code());

    // Kubernetes layer.
    let lister: Arc<dyn PodLister> = Arc::new(UnlinkedPodLister);
    let pod_client = Arc::new(GuardedPodClient::new(
        lister,
        config.k8s_layer.kubernetes.namespace.clone(),
        config.k8s_layer.kubernetes.api_timeout,
        config.k8s_layer.retry.clone(),
        config.k8s_layer.circuit_breaker.clone(),
    ));
    let restarts = Arc::new(RestartTracker::new(
        config.k8s_layer.restart_tracking.clone(),
        crash_recovery,
    ));
    let k8s = K8sLayerService::new(
        PodHealthChecker::new(Arc::clone(&pod_client), restarts),
        config.k8s_layer.clone(),
    );
    metrics.set_breaker_state(K8S_BREAKER_NAME, pod_client.breaker().state_code());

    // NOC pipeline.
    let queue = NocQueue::new(config.noc.duplicate_window);
    let suppression = Arc::new(SuppressionCache::new(config.noc.default_window));
    let noc_client = NocHttpClient::new(&config.noc.endpoint, config.noc.timeout)
        .context("failed to build NOC client")?;
    let snapshots = Arc::new(SnapshotService::new(
        Arc::clone(&vector),
        Arc::clone(&queue),
        Arc::clone(&metrics),
    ));

    let watchdog = WatchdogService::new(config.watchdog.clone(), crash_recovery, Arc::clone(&vector));

    let coordinator = Coordinator::new(
        Arc::clone(&vector),
        Arc::clone(&snapshots),
        Arc::clone(&k8s),
        Arc::clone(&watchdog),
        Arc::clone(&metrics),
        CoordinatorConfig {
            snapshot_interval: config.coordinator.snapshot_interval,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Background tasks.
    let worker = NocWorker::new(
        Arc::clone(&queue),
        Arc::clone(&vector),
        Arc::clone(&suppression),
        Arc::new(noc_client) as Arc<dyn NocDispatcher>,
        Arc::clone(&metrics),
        config.noc.cleanup_interval,
    );
    let worker_task = tokio::spawn(worker.run(shutdown_rx.clone()));

    let writer = BatchWriter::new(
        Arc::clone(&vector),
        Arc::clone(&store),
        std::time::Duration::from_millis(config.hazelcast.batch_window_ms),
    );
    let writer_task = tokio::spawn(writer.run(shutdown_rx.clone()));

    coordinator.start(shutdown_rx.clone()).await;

    // Ingress HTTP.
    let app_state = Arc::new(AppState {
        coordinator: Arc::clone(&coordinator),
        vector: Arc::clone(&vector),
        watchdog: Arc::clone(&watchdog),
        k8s: Arc::clone(&k8s),
        queue: Arc::clone(&queue),
        metrics: Arc::clone(&metrics),
    });
    let app = http::router(app_state);

    let addr = format!("{}:{}", config.http.bind, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        addr = %addr,
        crash_recovery,
        "argus daemon started (pid: {})",
        std::process::id()
    );

    let mut server_shutdown = shutdown_rx.clone();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    // Unix signals flip the shutdown channel.
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        let _ = signal_tx.send(true);
    });

    // Wait for the shutdown signal, then drain.
    let mut wait_shutdown = shutdown_rx;
    let _ = wait_shutdown.changed().await;

    info!("shutting down");
    watchdog.stop();
    let _ = server_task.await;
    let _ = worker_task.await;
    let _ = writer_task.await;

    info!("daemon shutdown complete");
    Ok(())
}
