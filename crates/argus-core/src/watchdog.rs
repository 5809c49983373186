//! Heartbeat-driven one-shot watchdog timer.
//!
//! The watchdog keeps a monotonic "last heartbeat" clock and a re-armable
//! expiration timer. Each heartbeat clears the expired flag and re-arms the
//! timer; when the timer fires without a fresh heartbeat the configured
//! expiry handler runs. During the boot grace period no timer is armed at
//! all - the first arming happens when the grace period elapses.
//!
//! The daemon and the pupil sidecar both build on this type: the daemon's
//! expiry writes a CREATE alert into the vector, the pupil's escalates to
//! NOC.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::duration::{serde_opt, serde_str};

/// Watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Push-alert name treated as a heartbeat by the coordinator.
    #[serde(default = "default_alert_name")]
    pub alert_name: String,

    /// Silence tolerated before expiry.
    #[serde(default = "default_timeout")]
    #[serde(with = "serde_str")]
    pub timeout: Duration,

    /// Grace period after a normal boot.
    #[serde(default = "default_normal_grace_period")]
    #[serde(with = "serde_str")]
    pub normal_grace_period: Duration,

    /// Grace period after a crash-recovery boot.
    #[serde(default = "default_crash_recovery_grace_period")]
    #[serde(with = "serde_str")]
    pub crash_recovery_grace_period: Duration,

    /// Whether the expiry alert is dispatched to NOC.
    #[serde(default = "default_send_to_noc")]
    pub send_to_noc: bool,

    /// Payload attached to the expiry alert.
    #[serde(default)]
    pub payload: String,

    /// Suppression window attached to the expiry alert.
    #[serde(default)]
    #[serde(with = "serde_opt")]
    pub suppress_window: Option<Duration>,
}

fn default_alert_name() -> String {
    "Watchdog".to_string()
}

const fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

const fn default_normal_grace_period() -> Duration {
    Duration::from_secs(600)
}

const fn default_crash_recovery_grace_period() -> Duration {
    Duration::from_secs(60)
}

const fn default_send_to_noc() -> bool {
    true
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            alert_name: default_alert_name(),
            timeout: default_timeout(),
            normal_grace_period: default_normal_grace_period(),
            crash_recovery_grace_period: default_crash_recovery_grace_period(),
            send_to_noc: default_send_to_noc(),
            payload: String::new(),
            suppress_window: None,
        }
    }
}

/// Watchdog configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum WatchdogConfigError {
    /// Timeout below one second.
    #[error("watchdog timeout must be at least 1s, got {0:?}")]
    TimeoutTooShort(Duration),
}

impl WatchdogConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the timeout is below one second.
    pub fn validate(&self) -> Result<(), WatchdogConfigError> {
        if self.timeout < Duration::from_secs(1) {
            return Err(WatchdogConfigError::TimeoutTooShort(self.timeout));
        }
        Ok(())
    }
}

/// Point-in-time view of the watchdog, served on the HTTP state endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogState {
    /// Last heartbeat wall-clock time, if any was received.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Whether the timer has expired without a fresh heartbeat.
    pub expired: bool,
    /// Whether the boot grace period is still active.
    pub grace_period_active: bool,
    /// Configured silence tolerance.
    #[serde(with = "serde_str")]
    pub timeout: Duration,
}

struct WatchdogInner {
    last_heartbeat: Option<DateTime<Utc>>,
    expired: bool,
    timeout: Duration,
    timer: Option<JoinHandle<()>>,
}

/// Handler invoked when the watchdog expires.
pub type ExpiryHandler = Arc<dyn Fn() + Send + Sync>;

/// Heartbeat-driven one-shot timer with grace periods.
pub struct Watchdog {
    config: WatchdogConfig,
    grace: Duration,
    started: Instant,
    on_expire: ExpiryHandler,
    inner: Mutex<WatchdogInner>,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("config", &self.config)
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

impl Watchdog {
    /// Create a watchdog. `crash_recovery` selects the short grace period.
    #[must_use]
    pub fn new(config: WatchdogConfig, crash_recovery: bool, on_expire: ExpiryHandler) -> Arc<Self> {
        let grace = if crash_recovery {
            config.crash_recovery_grace_period
        } else {
            config.normal_grace_period
        };
        let timeout = config.timeout;
        Arc::new(Self {
            config,
            grace,
            started: Instant::now(),
            on_expire,
            inner: Mutex::new(WatchdogInner {
                last_heartbeat: None,
                expired: false,
                timeout,
                timer: None,
            }),
        })
    }

    /// Start the grace timer. When the grace period elapses the expiration
    /// timer is armed even if no heartbeat was ever received, so a silent
    /// parent is detected `grace + timeout` after boot at the latest.
    pub fn start(self: &Arc<Self>) {
        let watchdog = Arc::clone(self);
        let grace = self.grace;
        tokio::spawn(async move {
            if !grace.is_zero() {
                tokio::time::sleep(grace).await;
                tracing::info!(grace = ?grace, "watchdog grace period ended");
            }
            let timeout = {
                let inner = watchdog.lock();
                if inner.expired || inner.timer.is_some() {
                    return;
                }
                inner.timeout
            };
            watchdog.arm(timeout);
        });
    }

    /// Record a heartbeat: reset the clock, clear the expired flag, and
    /// re-arm the timer unless the grace period is still active.
    pub fn record_heartbeat(self: &Arc<Self>, timeout_override: Option<Duration>) {
        let timeout = {
            let mut inner = self.lock();
            inner.last_heartbeat = Some(Utc::now());
            inner.expired = false;
            if let Some(timeout) = timeout_override {
                inner.timeout = timeout;
            }
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            inner.timeout
        };
        if !self.in_grace_period() {
            self.arm(timeout);
        }
    }

    /// Whether the boot grace period is still active.
    pub fn in_grace_period(&self) -> bool {
        self.started.elapsed() < self.grace
    }

    /// Whether the timer expired without a fresh heartbeat.
    pub fn is_expired(&self) -> bool {
        self.lock().expired
    }

    /// Point-in-time view of the watchdog.
    pub fn state(&self) -> WatchdogState {
        let inner = self.lock();
        WatchdogState {
            last_heartbeat: inner.last_heartbeat,
            expired: inner.expired,
            grace_period_active: self.in_grace_period(),
            timeout: inner.timeout,
        }
    }

    /// Configuration this watchdog was built with.
    #[must_use]
    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Abort any armed timer, for shutdown.
    pub fn stop(&self) {
        if let Some(timer) = self.lock().timer.take() {
            timer.abort();
        }
    }

    fn arm(self: &Arc<Self>, timeout: Duration) {
        let watchdog = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            watchdog.expire(timeout);
        });
        let mut inner = self.lock();
        if let Some(previous) = inner.timer.replace(handle) {
            previous.abort();
        }
    }

    fn expire(&self, timeout: Duration) {
        {
            let mut inner = self.lock();
            inner.expired = true;
            inner.timer = None;
        }
        tracing::warn!(
            name = %self.config.alert_name,
            timeout = ?timeout,
            "watchdog expired without heartbeat"
        );
        (self.on_expire)();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WatchdogInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
