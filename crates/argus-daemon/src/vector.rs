//! The alerts vector: the in-memory authoritative store (L1).
//!
//! One mutex guards the fingerprint map together with the write-behind
//! bookkeeping: `dirty` holds fingerprints whose L1 state has not been
//! flushed to L2, `tombstoned` holds fingerprints removed from L1 but not
//! yet removed from L2. The two sets are mutually exclusive; adding to one
//! removes from the other.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use argus_core::alert::{Alert, AlertStatus};
use chrono::Utc;

use crate::metrics::Metrics;
use crate::persistence::AlertStore;

/// Errors from vector operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    /// The alert carries no fingerprint.
    #[error("alert '{0}' has an empty fingerprint")]
    EmptyFingerprint(String),
}

/// Pending write-behind changes, read atomically per batch cycle.
#[derive(Debug, Default)]
pub struct PendingChanges {
    /// Alerts whose current state has not been flushed to L2.
    pub dirty: Vec<Alert>,
    /// Fingerprints removed from L1 but still present in L2.
    pub tombstoned: Vec<String>,
}

#[derive(Debug, Default)]
struct VectorState {
    alerts: HashMap<String, Alert>,
    dirty: HashSet<String>,
    tombstoned: HashSet<String>,
    crash_recovery: bool,
}

/// The alerts vector (L1).
#[derive(Debug)]
pub struct AlertsVector {
    state: Mutex<VectorState>,
    ttl: Duration,
    metrics: Arc<Metrics>,
}

impl AlertsVector {
    /// Create an empty vector with the given CREATE-entry TTL.
    #[must_use]
    pub fn new(ttl: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            state: Mutex::new(VectorState::default()),
            ttl,
            metrics,
        }
    }

    /// Insert or replace an alert.
    ///
    /// A CANCEL for a fingerprint never previously inserted is silently
    /// discarded. `last_seen` is stamped on every ingestion and kept
    /// strictly monotonic per fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error when the fingerprint is empty.
    pub fn update_alert(&self, mut alert: Alert) -> Result<(), VectorError> {
        if alert.fingerprint.is_empty() {
            return Err(VectorError::EmptyFingerprint(alert.name));
        }

        let mut state = self.lock();
        let existing = state.alerts.get(&alert.fingerprint);

        if existing.is_none() && alert.status == AlertStatus::Cancel {
            tracing::debug!(
                fingerprint = %alert.fingerprint,
                "dropping CANCEL for unknown fingerprint"
            );
            return Ok(());
        }

        let now = Utc::now();
        alert.last_seen = match existing {
            Some(previous) if now <= previous.last_seen => {
                previous.last_seen + chrono::Duration::microseconds(1)
            }
            _ => now,
        };

        let status_entered = existing.is_none_or(|previous| previous.status != alert.status);
        if status_entered {
            self.metrics.alert_status_entered(alert.status);
        }

        let fingerprint = alert.fingerprint.clone();
        state.alerts.insert(fingerprint.clone(), alert);
        state.tombstoned.remove(&fingerprint);
        state.dirty.insert(fingerprint);
        Ok(())
    }

    /// Remove an alert; returns whether it existed.
    pub fn remove_alert(&self, fingerprint: &str) -> bool {
        let mut state = self.lock();
        if state.alerts.remove(fingerprint).is_none() {
            return false;
        }
        state.dirty.remove(fingerprint);
        state.tombstoned.insert(fingerprint.to_string());
        self.metrics.alert_resolved();
        true
    }

    /// Look up an alert by fingerprint.
    pub fn get(&self, fingerprint: &str) -> Option<Alert> {
        self.lock().alerts.get(fingerprint).cloned()
    }

    /// A consistent point-in-time copy, ordered by `(priority, timestamp)`.
    pub fn snapshot(&self) -> Vec<Alert> {
        let state = self.lock();
        let mut alerts: Vec<Alert> = state.alerts.values().cloned().collect();
        alerts.sort_by_key(Alert::sort_key);
        alerts
    }

    /// Evict CREATE entries whose `last_seen` is older than the TTL.
    /// Evicted fingerprints are tombstoned for L2 removal.
    pub fn cleanup_expired(&self) -> usize {
        let ttl = match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => ttl,
            Err(_) => return 0,
        };
        let cutoff = Utc::now() - ttl;

        let mut state = self.lock();
        let expired: Vec<String> = state
            .alerts
            .iter()
            .filter(|(_, alert)| alert.status == AlertStatus::Create && alert.last_seen < cutoff)
            .map(|(fingerprint, _)| fingerprint.clone())
            .collect();

        for fingerprint in &expired {
            state.alerts.remove(fingerprint);
            state.dirty.remove(fingerprint);
            state.tombstoned.insert(fingerprint.clone());
            self.metrics.alert_resolved();
            tracing::info!(fingerprint = %fingerprint, "evicted expired CREATE alert");
        }
        expired.len()
    }

    /// Atomically read the pending write-behind changes.
    pub fn pending_changes(&self) -> PendingChanges {
        let state = self.lock();
        let dirty = state
            .dirty
            .iter()
            .filter_map(|fingerprint| state.alerts.get(fingerprint).cloned())
            .collect();
        let tombstoned = state.tombstoned.iter().cloned().collect();
        PendingChanges { dirty, tombstoned }
    }

    /// Clear dirty flags for persisted alerts. A flag is cleared only when
    /// the entry has not been rewritten since the persisted copy was read,
    /// so a concurrent update is never lost.
    pub fn clear_dirty_flags(&self, persisted: &[Alert]) {
        let mut state = self.lock();
        for alert in persisted {
            let unchanged = state
                .alerts
                .get(&alert.fingerprint)
                .is_some_and(|current| current.last_seen == alert.last_seen);
            if unchanged {
                state.dirty.remove(&alert.fingerprint);
            }
        }
    }

    /// Clear tombstones for fingerprints removed from L2.
    pub fn clear_removed_flags(&self, fingerprints: &[String]) {
        let mut state = self.lock();
        for fingerprint in fingerprints {
            state.tombstoned.remove(fingerprint);
        }
    }

    /// Load the vector from L2. Any recovered record flips the instance into
    /// crash-recovery mode; an unreachable or empty store means a fresh
    /// start.
    pub async fn initialize_from_l2(&self, store: &AlertStore) -> bool {
        let recovered = store.load_all().await;
        if recovered.is_empty() {
            tracing::info!("no L2 records found, booting fresh");
            return false;
        }

        let mut state = self.lock();
        tracing::warn!(
            count = recovered.len(),
            "recovered alerts from L2, booting in crash recovery"
        );
        for (fingerprint, alert) in recovered {
            state.alerts.insert(fingerprint, alert);
        }
        state.crash_recovery = true;
        true
    }

    /// Whether the instance booted in crash recovery.
    pub fn crash_recovery(&self) -> bool {
        self.lock().crash_recovery
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().alerts.len()
    }

    /// Whether the vector is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().alerts.is_empty()
    }

    /// Sizes of the dirty and tombstone sets, for tests and diagnostics.
    pub fn pending_counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.dirty.len(), state.tombstoned.len())
    }

    fn lock(&self) -> MutexGuard<'_, VectorState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
