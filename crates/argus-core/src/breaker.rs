//! Circuit breaker shared by the Kubernetes API and L2 persistence paths.
//!
//! Three states with the usual transitions:
//!
//! - **Closed**: calls proceed; `failure_threshold` consecutive failures open
//!   the breaker.
//! - **Open**: calls are refused; after `open_duration` the next state read
//!   atomically moves to half-open.
//! - **HalfOpen**: calls proceed; any failure reopens immediately,
//!   `success_threshold` consecutive successes close.
//!
//! The breaker also carries a log gate: while open, [`CircuitBreaker::should_log`]
//! answers true only once per `suppressed_log_interval` and counts the
//! suppressed occurrences, which are reported at the open to half-open edge.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::duration::serde_str;

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the breaker stays open before probing.
    #[serde(default = "default_open_duration")]
    #[serde(with = "serde_str")]
    pub open_duration: Duration,

    /// Consecutive half-open successes that close the breaker.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Minimum interval between log lines while the breaker is open.
    #[serde(default = "default_suppressed_log_interval")]
    #[serde(with = "serde_str")]
    pub suppressed_log_interval: Duration,
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_open_duration() -> Duration {
    Duration::from_secs(30)
}

const fn default_success_threshold() -> u32 {
    2
}

const fn default_suppressed_log_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_duration: default_open_duration(),
            success_threshold: default_success_threshold(),
            suppressed_log_interval: default_suppressed_log_interval(),
        }
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    /// Calls proceed, failures counted.
    Closed,
    /// Calls refused until the open window elapses.
    Open,
    /// Probe state; one failure reopens.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    last_open_log: Option<Instant>,
    suppressed_logs: u64,
}

/// Three-state circuit breaker with log suppression.
///
/// All transitions are serialised under a single mutex; the breaker itself
/// cannot fail.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker. `name` appears in log lines and the state gauge.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                last_open_log: None,
                suppressed_logs: 0,
            }),
        }
    }

    /// Breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state; performs the open to half-open transition when the open
    /// window has elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.advance(&mut inner);
        inner.state
    }

    /// Whether a protected call may proceed.
    pub fn is_allowed(&self) -> bool {
        self.state() != BreakerState::Open
    }

    /// Record a successful protected call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        self.advance(&mut inner);
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    tracing::info!(breaker = %self.name, "circuit breaker closed");
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed protected call.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        self.advance(&mut inner);
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                    Self::open(&mut inner);
                }
            }
            BreakerState::HalfOpen => {
                tracing::warn!(breaker = %self.name, "circuit breaker reopened from probe");
                Self::open(&mut inner);
            }
            BreakerState::Open => {}
        }
    }

    /// Log gate: true while closed or half-open; while open, true only once
    /// per `suppressed_log_interval`.
    pub fn should_log(&self) -> bool {
        let mut inner = self.lock();
        self.advance(&mut inner);
        if inner.state != BreakerState::Open {
            return true;
        }

        let due = inner
            .last_open_log
            .is_none_or(|last| last.elapsed() >= self.config.suppressed_log_interval);
        if due {
            inner.last_open_log = Some(Instant::now());
            true
        } else {
            inner.suppressed_logs += 1;
            false
        }
    }

    /// Numeric state for the metrics gauge: 0 closed, 1 open, 2 half-open.
    pub fn state_code(&self) -> i64 {
        match self.state() {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }

    fn open(inner: &mut BreakerInner) {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.consecutive_successes = 0;
        inner.last_open_log = None;
        inner.suppressed_logs = 0;
    }

    /// Open to half-open when the open window has elapsed; reports the
    /// suppressed-log count accumulated while open.
    fn advance(&self, inner: &mut BreakerInner) {
        if inner.state != BreakerState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .is_some_and(|at| at.elapsed() >= self.config.open_duration);
        if elapsed {
            if inner.suppressed_logs > 0 {
                tracing::warn!(
                    breaker = %self.name,
                    suppressed = inner.suppressed_logs,
                    "log lines suppressed while circuit was open"
                );
            }
            inner.state = BreakerState::HalfOpen;
            inner.consecutive_successes = 0;
            inner.suppressed_logs = 0;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // A poisoned breaker mutex means a panic mid-transition; the state is
        // a plain value either way.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
