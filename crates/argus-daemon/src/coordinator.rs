//! Top-level scheduler: boot branching and the three alert sources.
//!
//! The coordinator owns the push ingestion path, the Kubernetes poll timer
//! and the snapshot timer. Boot branches on what
//! [`AlertsVector::initialize_from_l2`] found:
//!
//! - **Crash recovery**: poll Kubernetes once synchronously, take the
//!   cancel-everything recovery snapshot, then start both timers
//!   immediately.
//! - **Normal**: start the poll timer, hold snapshots back for the grace
//!   period, then take one and start the recurring timer.
//!
//! Timer ticks stay cheap: each spawns its work onto the runtime and
//! returns.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use argus_core::alert::PushAlert;
use argus_core::duration::serde_str;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::k8s::{K8sLayerService, K8S_BREAKER_NAME};
use crate::metrics::Metrics;
use crate::noc::SnapshotService;
use crate::vector::AlertsVector;
use crate::watchdog::WatchdogService;

/// Coordinator options. The snapshot hold-back after a normal boot comes
/// from the watchdog's grace period, so the two subsystems leave their
/// grace together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Snapshot cadence.
    #[serde(default = "default_snapshot_interval")]
    #[serde(with = "serde_str")]
    pub snapshot_interval: Duration,
}

const fn default_snapshot_interval() -> Duration {
    Duration::from_secs(30)
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: default_snapshot_interval(),
        }
    }
}

/// Generate a correlation ID: `<prefix>-<8 hex>`.
#[must_use]
pub fn correlation_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &hex[..8])
}

/// The top-level scheduler.
#[derive(Debug)]
pub struct Coordinator {
    vector: Arc<AlertsVector>,
    snapshots: Arc<SnapshotService>,
    k8s: Arc<K8sLayerService>,
    watchdog: Arc<WatchdogService>,
    metrics: Arc<Metrics>,
    config: CoordinatorConfig,
    last_alert_received: Mutex<Option<DateTime<Utc>>>,
}

impl Coordinator {
    /// Create the coordinator.
    #[must_use]
    pub fn new(
        vector: Arc<AlertsVector>,
        snapshots: Arc<SnapshotService>,
        k8s: Arc<K8sLayerService>,
        watchdog: Arc<WatchdogService>,
        metrics: Arc<Metrics>,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            vector,
            snapshots,
            k8s,
            watchdog,
            metrics,
            config,
            last_alert_received: Mutex::new(None),
        })
    }

    /// Boot the sources. Branches on crash recovery.
    pub async fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) {
        self.metrics.set_grace_period_active(true);
        self.watchdog.start();

        if self.vector.crash_recovery() {
            tracing::warn!("booting in crash recovery");

            let poll_corr = correlation_id("poll");
            self.poll_k8s(&poll_corr).await;

            let snapshot_corr = correlation_id("snapshot");
            self.snapshots.take_crash_recovery_snapshot(&snapshot_corr);
            self.metrics.set_grace_period_active(false);

            self.spawn_poll_loop(shutdown.clone());
            self.spawn_snapshot_loop(shutdown, self.config.snapshot_interval);
        } else {
            let grace = self.watchdog.normal_grace_period();
            tracing::info!(
                grace = ?grace,
                "booting normally, snapshots held back for grace period"
            );
            self.spawn_poll_loop(shutdown.clone());
            self.spawn_snapshot_loop(shutdown, grace);
        }
    }

    /// Ingest one push batch.
    pub fn receive_alerts(&self, alerts: Vec<PushAlert>, correlation_id_str: &str) {
        *self
            .last_alert_received
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Utc::now());

        for push in alerts {
            self.metrics.alert_received();

            if !push.platform().eq_ignore_ascii_case("argus") {
                self.metrics.alert_filtered();
                tracing::debug!(
                    correlation_id = %correlation_id_str,
                    name = %push.name(),
                    platform = %push.platform(),
                    "dropping alert for foreign platform"
                );
                continue;
            }

            let execution_id = correlation_id("exec");

            if push.name() == self.watchdog.alert_name() && push.is_firing() {
                tracing::debug!(
                    correlation_id = %correlation_id_str,
                    execution_id = %execution_id,
                    "push alert routed to watchdog heartbeat"
                );
                self.watchdog.record_heartbeat();
                continue;
            }

            let alert = push.to_alert(&execution_id);
            tracing::info!(
                correlation_id = %correlation_id_str,
                execution_id = %execution_id,
                fingerprint = %alert.fingerprint,
                name = %alert.name,
                status = %alert.status,
                "push alert ingested"
            );
            if let Err(error) = self.vector.update_alert(alert) {
                tracing::warn!(
                    correlation_id = %correlation_id_str,
                    %error,
                    "rejected push alert"
                );
            }
        }
    }

    /// When the last push batch arrived.
    pub fn last_alert_received(&self) -> Option<DateTime<Utc>> {
        *self
            .last_alert_received
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// One Kubernetes poll: both layer alerts share one execution ID.
    pub async fn poll_k8s(&self, correlation_id_str: &str) {
        let started = std::time::Instant::now();
        let execution_id = correlation_id("exec");

        let state = self.k8s.get_state(correlation_id_str).await;
        for alert in self.k8s.generate_alerts(&state, &execution_id) {
            if let Err(error) = self.vector.update_alert(alert) {
                tracing::error!(%error, "failed to record layer alert");
            }
        }

        self.metrics
            .set_breaker_state(K8S_BREAKER_NAME, self.k8s.breaker().state_code());
        self.metrics.observe_k8s_poll(started.elapsed().as_secs_f64());
    }

    /// One snapshot tick.
    pub fn snapshot_tick(&self) {
        let corr = correlation_id("snapshot");
        self.snapshots.take_snapshot(&corr);
    }

    fn spawn_poll_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let coordinator = Arc::clone(self);
        let interval = coordinator.k8s.config().polling_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately; the boot
            // path already polled or deliberately deferred, so skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let corr = correlation_id("poll");
                        coordinator.poll_k8s(&corr).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }

    fn spawn_snapshot_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>, initial_delay: Duration) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(initial_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }

            coordinator.metrics.set_grace_period_active(false);
            coordinator.snapshot_tick();

            let mut ticker = tokio::time::interval(coordinator.config.snapshot_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        coordinator.snapshot_tick();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }
}
