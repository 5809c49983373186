//! Per-fingerprint suppression bookkeeping.
//!
//! The cache remembers when each fingerprint was last dispatched and under
//! which window. Window precedence for an alert: its explicit
//! `suppress_window` field, then the `suppress_window` annotation (an empty
//! string means no suppression at all), then the configured default.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use argus_core::alert::{Alert, SUPPRESS_WINDOW_ANNOTATION};
use argus_core::duration::parse_duration;

#[derive(Debug, Clone, Copy)]
struct SuppressionEntry {
    last_sent: Instant,
    window: Duration,
}

/// Fingerprint to last-sent bookkeeping.
#[derive(Debug)]
pub struct SuppressionCache {
    entries: Mutex<HashMap<String, SuppressionEntry>>,
    default_window: Duration,
}

impl SuppressionCache {
    /// Create a cache with the configured default window.
    #[must_use]
    pub fn new(default_window: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_window,
        }
    }

    /// Resolve the suppression window for an alert.
    ///
    /// Precedence: explicit field, `suppress_window` annotation (empty
    /// string disables suppression; an invalid string warns and falls back
    /// to the default), configured default.
    pub fn suppression_window(&self, alert: &Alert) -> Duration {
        if let Some(window) = alert.suppress_window {
            return Duration::from_secs(window.as_secs());
        }

        if let Some(annotation) = alert.annotations.get(SUPPRESS_WINDOW_ANNOTATION) {
            if annotation.is_empty() {
                return Duration::ZERO;
            }
            match parse_duration(annotation) {
                Ok(window) => return window,
                Err(error) => {
                    tracing::warn!(
                        fingerprint = %alert.fingerprint,
                        %error,
                        "invalid suppress_window annotation, using default"
                    );
                }
            }
        }

        self.default_window
    }

    /// Whether a dispatch for this alert should be withheld.
    pub fn should_suppress(&self, alert: &Alert) -> bool {
        if self.suppression_window(alert).is_zero() {
            return false;
        }
        self.lock()
            .get(&alert.fingerprint)
            .is_some_and(|entry| entry.last_sent.elapsed() < entry.window)
    }

    /// Record a dispatch. Alerts with a zero window are never recorded.
    pub fn mark_as_sent(&self, alert: &Alert) {
        let window = self.suppression_window(alert);
        if window.is_zero() {
            return;
        }
        self.lock().insert(
            alert.fingerprint.clone(),
            SuppressionEntry {
                last_sent: Instant::now(),
                window,
            },
        );
    }

    /// Drop entries whose window has fully elapsed.
    pub fn cleanup(&self) {
        self.lock()
            .retain(|_, entry| entry.last_sent.elapsed() <= entry.window);
    }

    /// Number of tracked fingerprints.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SuppressionEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
