//! Snapshot service: turns the ordered vector into queued decisions.
//!
//! Each snapshot enqueues at most one CREATE (the highest-priority active
//! one) and at most one UNKNOWN; NOC reporting is deliberately serial, so
//! lower-priority CREATEs wait for later cycles. All eligible CANCELs go
//! out together as one batch.

use std::sync::Arc;
use std::time::Instant;

use argus_core::alert::{Alert, AlertStatus};
use chrono::Utc;

use super::{NocDecision, NocQueue};
use crate::metrics::Metrics;
use crate::vector::AlertsVector;

/// Summary prefix applied to crash-recovery cancels.
const CRASH_RECOVERY_PREFIX: &str = "[CRASH RECOVERY]";

/// Reads the vector and enqueues dispatch decisions.
#[derive(Debug)]
pub struct SnapshotService {
    vector: Arc<AlertsVector>,
    queue: Arc<NocQueue>,
    metrics: Arc<Metrics>,
}

impl SnapshotService {
    /// Create the service.
    #[must_use]
    pub fn new(vector: Arc<AlertsVector>, queue: Arc<NocQueue>, metrics: Arc<Metrics>) -> Self {
        Self {
            vector,
            queue,
            metrics,
        }
    }

    /// Take one snapshot: evict expired CREATEs, refresh the gauges, and
    /// enqueue the cycle's decisions.
    pub fn take_snapshot(&self, correlation_id: &str) {
        let started = Instant::now();

        let evicted = self.vector.cleanup_expired();
        if evicted > 0 {
            tracing::info!(
                correlation_id = %correlation_id,
                evicted,
                "expired alerts evicted before snapshot"
            );
        }

        let snapshot = self.vector.snapshot();
        self.update_gauges(&snapshot);

        // At most one CREATE per cycle: the highest-priority active one,
        // skipped entirely while its duplicate mark is fresh.
        if let Some(first_create) = snapshot
            .iter()
            .find(|alert| alert.status == AlertStatus::Create)
        {
            if self.queue.was_recently_enqueued(&first_create.fingerprint) {
                tracing::debug!(
                    fingerprint = %first_create.fingerprint,
                    "create recently enqueued, skipping"
                );
            } else {
                self.queue.mark_enqueued(&first_create.fingerprint);
                self.metrics.noc_decision("create");
                self.queue
                    .enqueue(NocDecision::create(first_create.clone(), correlation_id));
            }
        }

        if let Some(first_unknown) = snapshot
            .iter()
            .find(|alert| alert.status == AlertStatus::Unknown)
        {
            if !self.queue.was_recently_enqueued(&first_unknown.fingerprint) {
                self.queue.mark_enqueued(&first_unknown.fingerprint);
                self.metrics.noc_decision("unknown");
                self.queue
                    .enqueue(NocDecision::unknown(first_unknown.clone(), correlation_id));
            }
        }

        let cancels: Vec<Alert> = snapshot
            .iter()
            .filter(|alert| alert.status == AlertStatus::Cancel)
            .filter(|alert| !self.queue.was_recently_enqueued(&alert.fingerprint))
            .cloned()
            .collect();
        if !cancels.is_empty() {
            for alert in &cancels {
                self.queue.mark_enqueued(&alert.fingerprint);
            }
            self.metrics.noc_decision("cancels");
            self.queue
                .enqueue(NocDecision::cancels(cancels, correlation_id));
        }

        self.metrics.observe_snapshot(started.elapsed().as_secs_f64());
    }

    /// Crash-recovery reconciliation, run exactly once per crash boot:
    /// everything that might have been dispatched before the crash is
    /// cancelled, then the live sources re-create what they still claim.
    /// IGNORE entries never reached NOC and are left alone.
    pub fn take_crash_recovery_snapshot(&self, correlation_id: &str) {
        let started = Instant::now();
        let snapshot = self.vector.snapshot();
        self.update_gauges(&snapshot);

        let mut cancels = Vec::new();
        for entry in snapshot {
            if entry.status == AlertStatus::Ignore {
                continue;
            }
            let mut cancel = entry;
            cancel.status = AlertStatus::Cancel;
            cancel.summary = format!("{CRASH_RECOVERY_PREFIX} {}", cancel.summary);
            cancel.last_seen = Utc::now();
            if let Err(error) = self.vector.update_alert(cancel.clone()) {
                tracing::warn!(%error, "skipping unusable recovered alert");
                continue;
            }
            cancels.push(cancel);
        }

        tracing::info!(
            correlation_id = %correlation_id,
            count = cancels.len(),
            "crash recovery snapshot taken"
        );

        if !cancels.is_empty() {
            for alert in &cancels {
                self.queue.mark_enqueued(&alert.fingerprint);
            }
            self.metrics.noc_decision("cancels");
            self.queue
                .enqueue(NocDecision::cancels(cancels, correlation_id));
        }

        self.metrics.observe_snapshot(started.elapsed().as_secs_f64());
    }

    fn update_gauges(&self, snapshot: &[Alert]) {
        let count_of = |status: AlertStatus| {
            snapshot
                .iter()
                .filter(|alert| alert.status == status)
                .count()
        };
        self.metrics.set_vector_gauges(
            snapshot.len(),
            &[
                (AlertStatus::Create, count_of(AlertStatus::Create)),
                (AlertStatus::Cancel, count_of(AlertStatus::Cancel)),
                (AlertStatus::Ignore, count_of(AlertStatus::Ignore)),
                (AlertStatus::Unknown, count_of(AlertStatus::Unknown)),
            ],
        );
        self.metrics.set_queue_depth(self.queue.depth());
    }
}
