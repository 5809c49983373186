//! The pupil's watchdog: worker silence escalates to NOC.
//!
//! Heartbeats may carry the NOC details to send on expiry and an optional
//! timeout override. When the timer fires, the escalation runs through the
//! retrying NOC client; its failure path persists the message and requests
//! shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use argus_core::duration::format_duration;
use argus_core::noc::NocDetails;
use argus_core::watchdog::{Watchdog, WatchdogConfig, WatchdogState};

use crate::noc_client::PupilNocClient;

/// Watchdog wired to NOC escalation.
pub struct PupilWatchdog {
    watchdog: Arc<Watchdog>,
    pending: Arc<Mutex<Option<NocDetails>>>,
}

impl PupilWatchdog {
    /// Create the watchdog. `crash_recovery` selects the short grace period
    /// (set when a recovery file was found at boot).
    #[must_use]
    pub fn new(
        config: WatchdogConfig,
        crash_recovery: bool,
        client: Arc<PupilNocClient>,
    ) -> Arc<Self> {
        let pending: Arc<Mutex<Option<NocDetails>>> = Arc::new(Mutex::new(None));

        let expiry_pending = Arc::clone(&pending);
        let expiry_config = config.clone();
        let watchdog = Watchdog::new(
            config,
            crash_recovery,
            Arc::new(move || {
                let details = expiry_pending
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .clone()
                    .unwrap_or_else(|| default_details(&expiry_config));
                let client = Arc::clone(&client);
                // The timer callback must return promptly; the escalation
                // (with its retries) runs as its own task.
                tokio::spawn(async move {
                    let correlation_id = crate::correlation_id();
                    let _ = client.send(&details, &correlation_id).await;
                });
            }),
        );

        Arc::new(Self { watchdog, pending })
    }

    /// Start the grace timer.
    pub fn start(&self) {
        Arc::clone(&self.watchdog).start();
    }

    /// Record a heartbeat. `details`, when present, replace the escalation
    /// message; `timeout_override` re-arms with a new silence tolerance.
    pub fn heartbeat(&self, timeout_override: Option<Duration>, details: Option<NocDetails>) {
        if let Some(details) = details {
            *self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(details);
        }
        self.watchdog.record_heartbeat(timeout_override);
    }

    /// Point-in-time view.
    #[must_use]
    pub fn state(&self) -> WatchdogState {
        self.watchdog.state()
    }

    /// Abort any armed timer.
    pub fn stop(&self) {
        self.watchdog.stop();
    }
}

impl std::fmt::Debug for PupilWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PupilWatchdog").finish_non_exhaustive()
    }
}

/// Escalation message used when no heartbeat ever supplied one.
fn default_details(config: &WatchdogConfig) -> NocDetails {
    NocDetails {
        priority: -1,
        name: config.alert_name.clone(),
        summary: format!(
            "worker silent for more than {}",
            format_duration(config.timeout)
        ),
        description: String::new(),
        payload: config.payload.clone(),
        source: "pupil".to_string(),
        send_to_noc: config.send_to_noc,
        suppress_window: config.suppress_window.map(format_duration),
    }
}
