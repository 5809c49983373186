//! The daemon's watchdog service: heartbeats and expiries become vector
//! entries.
//!
//! A push alert whose name matches the configured watchdog name is treated
//! as a heartbeat by the coordinator and lands here instead of the vector.
//! Every heartbeat also writes an IGNORE entry so the vector always carries
//! the watchdog's latest verdict; expiry rewrites it to CREATE with the
//! configured NOC behaviour.

use std::collections::BTreeMap;
use std::sync::Arc;

use argus_core::alert::{Alert, AlertStatus, PRIORITY_WATCHDOG};
use argus_core::watchdog::{Watchdog, WatchdogConfig, WatchdogState};
use chrono::Utc;

use crate::vector::AlertsVector;

/// Fingerprint of the watchdog alert.
pub const WATCHDOG_FINGERPRINT: &str = "watchdog";

/// Watchdog wired to the alerts vector.
#[derive(Debug)]
pub struct WatchdogService {
    watchdog: Arc<Watchdog>,
    vector: Arc<AlertsVector>,
}

impl WatchdogService {
    /// Create the service. `crash_recovery` selects the short grace period.
    #[must_use]
    pub fn new(config: WatchdogConfig, crash_recovery: bool, vector: Arc<AlertsVector>) -> Arc<Self> {
        let expiry_vector = Arc::clone(&vector);
        let expiry_config = config.clone();
        let watchdog = Watchdog::new(
            config,
            crash_recovery,
            Arc::new(move || {
                let alert = expiry_alert(&expiry_config);
                if let Err(error) = expiry_vector.update_alert(alert) {
                    tracing::error!(%error, "failed to record watchdog expiry alert");
                }
            }),
        );
        Arc::new(Self { watchdog, vector })
    }

    /// Start the grace timer.
    pub fn start(&self) {
        Arc::clone(&self.watchdog).start();
    }

    /// Record a heartbeat and write the IGNORE entry.
    pub fn record_heartbeat(&self) {
        self.watchdog.record_heartbeat(None);

        let now = Utc::now();
        let config = self.watchdog.config();
        let alert = Alert {
            priority: PRIORITY_WATCHDOG,
            name: config.alert_name.clone(),
            summary: "watchdog heartbeat received".to_string(),
            description: String::new(),
            payload: String::new(),
            source: "watchdog".to_string(),
            fingerprint: WATCHDOG_FINGERPRINT.to_string(),
            status: AlertStatus::Ignore,
            send_to_noc: false,
            suppress_window: None,
            timestamp: now,
            last_seen: now,
            annotations: BTreeMap::new(),
            execution_id: String::new(),
            prometheus: None,
        };
        if let Err(error) = self.vector.update_alert(alert) {
            tracing::error!(%error, "failed to record watchdog heartbeat alert");
        }
    }

    /// Point-in-time watchdog view.
    #[must_use]
    pub fn state(&self) -> WatchdogState {
        self.watchdog.state()
    }

    /// Configured watchdog alert name.
    #[must_use]
    pub fn alert_name(&self) -> &str {
        &self.watchdog.config().alert_name
    }

    /// Configured normal-boot grace period, shared with the coordinator's
    /// snapshot hold-back.
    #[must_use]
    pub fn normal_grace_period(&self) -> std::time::Duration {
        self.watchdog.config().normal_grace_period
    }

    /// Abort any armed timer.
    pub fn stop(&self) {
        self.watchdog.stop();
    }
}

fn expiry_alert(config: &WatchdogConfig) -> Alert {
    let now = Utc::now();
    Alert {
        priority: PRIORITY_WATCHDOG,
        name: config.alert_name.clone(),
        summary: "watchdog expired: no heartbeat received in time".to_string(),
        description: format!(
            "no heartbeat within {}",
            argus_core::duration::format_duration(config.timeout)
        ),
        payload: config.payload.clone(),
        source: "watchdog".to_string(),
        fingerprint: WATCHDOG_FINGERPRINT.to_string(),
        status: AlertStatus::Create,
        send_to_noc: config.send_to_noc,
        suppress_window: config.suppress_window,
        timestamp: now,
        last_seen: now,
        annotations: BTreeMap::new(),
        execution_id: String::new(),
        prometheus: None,
    }
}
