//! Sliding-window restart storm detection for pods.
//!
//! The tracker keeps, per pod, a bounded FIFO of the most recent restart
//! counts observed. A pod is reported unstable when the growth across the
//! window reaches the configured threshold - but only once the window is
//! full and the boot grace period (if any) has elapsed.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::duration::serde_str;

/// Restart tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartTrackingConfig {
    /// Number of observations kept per pod.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Restarts across a full window that mark the pod unstable.
    #[serde(default = "default_restart_threshold")]
    pub restart_threshold: u64,

    /// Grace period after a normal boot during which pods always report
    /// stable.
    #[serde(default = "default_normal_grace_period")]
    #[serde(with = "serde_str")]
    pub normal_grace_period: Duration,
}

const fn default_window_size() -> usize {
    5
}

const fn default_restart_threshold() -> u64 {
    3
}

const fn default_normal_grace_period() -> Duration {
    Duration::from_secs(300)
}

impl Default for RestartTrackingConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            restart_threshold: default_restart_threshold(),
            normal_grace_period: default_normal_grace_period(),
        }
    }
}

/// Outcome of one restart-count observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartObservation {
    /// Restarts accumulated across the current window.
    pub restarts_in_window: u64,
    /// Whether the pod is considered restart-stable.
    pub stable: bool,
}

#[derive(Debug, Default)]
struct TrackerState {
    windows: HashMap<String, VecDeque<u64>>,
    grace_expiry_logged: bool,
}

/// Per-pod sliding window of restart counts.
#[derive(Debug)]
pub struct RestartTracker {
    config: RestartTrackingConfig,
    /// Inactive when the instance booted in crash recovery.
    grace_enabled: bool,
    started: Instant,
    state: Mutex<TrackerState>,
}

impl RestartTracker {
    /// Create a tracker. `crash_recovery` disables the boot grace period.
    #[must_use]
    pub fn new(config: RestartTrackingConfig, crash_recovery: bool) -> Self {
        Self {
            config,
            grace_enabled: !crash_recovery,
            started: Instant::now(),
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Whether the boot grace period is currently active.
    pub fn in_grace_period(&self) -> bool {
        self.grace_enabled && self.started.elapsed() < self.config.normal_grace_period
    }

    /// Record the current restart count for a pod and evaluate stability.
    pub fn observe(&self, pod_id: &str, restart_count: u64) -> RestartObservation {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let window = state.windows.entry(pod_id.to_string()).or_default();
        window.push_back(restart_count);
        while window.len() > self.config.window_size {
            window.pop_front();
        }

        let restarts_in_window = if window.len() >= 2 {
            restart_count.saturating_sub(*window.front().unwrap_or(&restart_count))
        } else {
            0
        };
        let window_full = window.len() >= self.config.window_size;

        let in_grace = self.in_grace_period();
        if self.grace_enabled && !in_grace && !state.grace_expiry_logged {
            state.grace_expiry_logged = true;
            tracing::info!("restart tracking grace period ended");
        }

        let stable = if in_grace {
            true
        } else if !window_full {
            // Still bootstrapping the window.
            true
        } else {
            restarts_in_window < self.config.restart_threshold
        };

        RestartObservation {
            restarts_in_window,
            stable,
        }
    }

    /// Drop the window for a pod that no longer exists.
    pub fn forget(&self, pod_id: &str) {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .windows
            .remove(pod_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_grace_config(window_size: usize, threshold: u64) -> RestartTrackingConfig {
        RestartTrackingConfig {
            window_size,
            restart_threshold: threshold,
            normal_grace_period: Duration::from_secs(0),
        }
    }

    #[test]
    fn test_stable_while_window_fills() {
        let tracker = RestartTracker::new(no_grace_config(3, 2), false);

        assert!(tracker.observe("pod-a", 10).stable);
        assert!(tracker.observe("pod-a", 11).stable);
        // Third observation fills the window; 12 - 10 >= 2 flips unstable.
        let obs = tracker.observe("pod-a", 12);
        assert_eq!(obs.restarts_in_window, 2);
        assert!(!obs.stable);
    }

    #[test]
    fn test_unstable_exactly_at_threshold() {
        let tracker = RestartTracker::new(no_grace_config(3, 3), false);
        tracker.observe("pod-a", 0);
        tracker.observe("pod-a", 1);
        let obs = tracker.observe("pod-a", 2);
        assert_eq!(obs.restarts_in_window, 2);
        assert!(obs.stable);

        let obs = tracker.observe("pod-a", 4);
        assert_eq!(obs.restarts_in_window, 3);
        assert!(!obs.stable);
    }

    #[test]
    fn test_quiet_pod_recovers() {
        let tracker = RestartTracker::new(no_grace_config(3, 2), false);
        tracker.observe("pod-a", 0);
        tracker.observe("pod-a", 2);
        assert!(!tracker.observe("pod-a", 3).stable);

        // Flat counts slide the spike out of the window.
        tracker.observe("pod-a", 3);
        tracker.observe("pod-a", 3);
        assert!(tracker.observe("pod-a", 3).stable);
    }

    #[test]
    fn test_grace_period_reports_stable() {
        let config = RestartTrackingConfig {
            window_size: 2,
            restart_threshold: 1,
            normal_grace_period: Duration::from_secs(3600),
        };
        let tracker = RestartTracker::new(config.clone(), false);
        tracker.observe("pod-a", 0);
        assert!(tracker.observe("pod-a", 50).stable);

        // Crash recovery boot disables the grace period.
        let tracker = RestartTracker::new(config, true);
        tracker.observe("pod-a", 0);
        assert!(!tracker.observe("pod-a", 50).stable);
    }

    #[test]
    fn test_windows_are_per_pod() {
        let tracker = RestartTracker::new(no_grace_config(2, 1), false);
        tracker.observe("pod-a", 0);
        assert!(!tracker.observe("pod-a", 5).stable);
        tracker.observe("pod-b", 0);
        assert!(tracker.observe("pod-b", 0).stable);
    }
}
