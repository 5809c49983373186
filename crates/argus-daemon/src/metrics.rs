//! Prometheus-backed metrics facade.
//!
//! One registry holds every counter, gauge and histogram the daemon
//! produces. The facade does no buffering beyond the atomic metric
//! primitives; the OpenTelemetry collector (selected via
//! `OPENTELEMETRY_COLLECTOR_ENDPOINT`) scrapes or receives the same
//! families. The legacy `/metrics` endpoint encodes the registry as
//! Prometheus text.

use std::sync::Arc;

use argus_core::alert::AlertStatus;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use thiserror::Error;

/// Histogram buckets for the K8s poll and snapshot durations (seconds).
const DURATION_BUCKETS: &[f64] = &[0.005, 0.025, 0.1, 0.25, 1.0, 2.5, 10.0];

/// Errors from metrics registration or encoding.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A metric failed to register (duplicate name).
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Encoding the registry to text failed.
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Aggregated counter/gauge values, for tests and the health endpoint.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Push alerts received.
    pub received: u64,
    /// Push alerts dropped by the platform filter.
    pub filtered: u64,
    /// Push bodies rejected at the ingress.
    pub push_rejected: u64,
    /// Vector entries created.
    pub created: u64,
    /// Vector entries resolved (removed).
    pub resolved: u64,
    /// Vector entries that entered UNKNOWN.
    pub unknown: u64,
    /// Alerts dispatched to NOC.
    pub noc_sent: u64,
    /// Dispatches withheld by the suppression cache.
    pub noc_suppressed: u64,
    /// Definitive NOC POST failures.
    pub noc_send_failures: u64,
    /// Successful L2 writes.
    pub l2_write_success: u64,
    /// Failed L2 writes.
    pub l2_write_failure: u64,
    /// Current vector size.
    pub vector_size: i64,
    /// Current NOC queue depth.
    pub noc_queue_depth: i64,
    /// Whether a boot grace period is active.
    pub grace_period_active: bool,
    /// Whether L2 is currently reachable.
    pub l2_available: bool,
}

/// The daemon metrics facade.
///
/// All members use interior mutability; the struct is shared as
/// `Arc<Metrics>` across every component.
pub struct Metrics {
    registry: Registry,

    received: IntCounter,
    filtered: IntCounter,
    push_rejected: IntCounter,
    created: IntCounter,
    resolved: IntCounter,
    unknown: IntCounter,
    noc_decisions: IntCounterVec,
    noc_sent: IntCounter,
    noc_suppressed: IntCounter,
    noc_send_failures: IntCounter,
    l2_writes: IntCounterVec,

    vector_size: IntGauge,
    vector_by_status: IntGaugeVec,
    noc_queue_depth: IntGauge,
    breaker_state: IntGaugeVec,
    grace_period_active: IntGauge,
    l2_available: IntGauge,

    k8s_poll_duration: Histogram,
    snapshot_duration: Histogram,
}

impl Metrics {
    /// Create the facade and register every family with a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns an error if any family fails to register.
    pub fn new() -> Result<Arc<Self>, MetricsError> {
        let registry = Registry::new();

        let received = IntCounter::with_opts(Opts::new(
            "argus_alerts_received_total",
            "Push alerts received on the ingress",
        ))?;
        let filtered = IntCounter::with_opts(Opts::new(
            "argus_alerts_filtered_total",
            "Push alerts dropped by the platform filter",
        ))?;
        let push_rejected = IntCounter::with_opts(Opts::new(
            "argus_push_rejected_total",
            "Push bodies rejected at the ingress",
        ))?;
        let created = IntCounter::with_opts(Opts::new(
            "argus_alerts_created_total",
            "Vector entries that entered CREATE",
        ))?;
        let resolved = IntCounter::with_opts(Opts::new(
            "argus_alerts_resolved_total",
            "Vector entries removed",
        ))?;
        let unknown = IntCounter::with_opts(Opts::new(
            "argus_alerts_unknown_total",
            "Vector entries that entered UNKNOWN",
        ))?;
        let noc_decisions = IntCounterVec::new(
            Opts::new("argus_noc_decisions_total", "NOC decisions enqueued"),
            &["kind"],
        )?;
        let noc_sent = IntCounter::with_opts(Opts::new(
            "argus_noc_sent_total",
            "Alerts dispatched to the NOC endpoint",
        ))?;
        let noc_suppressed = IntCounter::with_opts(Opts::new(
            "argus_noc_suppressed_total",
            "Dispatches withheld by the suppression cache",
        ))?;
        let noc_send_failures = IntCounter::with_opts(Opts::new(
            "argus_noc_send_failures_total",
            "Definitive NOC POST failures",
        ))?;
        let l2_writes = IntCounterVec::new(
            Opts::new("argus_l2_writes_total", "L2 write outcomes"),
            &["outcome"],
        )?;

        let vector_size = IntGauge::with_opts(Opts::new(
            "argus_vector_size",
            "Entries currently in the alerts vector",
        ))?;
        let vector_by_status = IntGaugeVec::new(
            Opts::new("argus_vector_by_status", "Vector entries by status"),
            &["status"],
        )?;
        let noc_queue_depth = IntGauge::with_opts(Opts::new(
            "argus_noc_queue_depth",
            "Decisions waiting in the NOC queue",
        ))?;
        let breaker_state = IntGaugeVec::new(
            Opts::new(
                "argus_circuit_breaker_state",
                "Breaker state (0 closed, 1 open, 2 half-open)",
            ),
            &["breaker"],
        )?;
        let grace_period_active = IntGauge::with_opts(Opts::new(
            "argus_grace_period_active",
            "Whether a boot grace period is active",
        ))?;
        let l2_available = IntGauge::with_opts(Opts::new(
            "argus_l2_available",
            "Whether the distributed map is reachable",
        ))?;

        let k8s_poll_duration = Histogram::with_opts(
            HistogramOpts::new(
                "argus_k8s_poll_duration_seconds",
                "Duration of one Kubernetes layer poll",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
        )?;
        let snapshot_duration = Histogram::with_opts(
            HistogramOpts::new(
                "argus_snapshot_duration_seconds",
                "Duration of one vector snapshot",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(filtered.clone()))?;
        registry.register(Box::new(push_rejected.clone()))?;
        registry.register(Box::new(created.clone()))?;
        registry.register(Box::new(resolved.clone()))?;
        registry.register(Box::new(unknown.clone()))?;
        registry.register(Box::new(noc_decisions.clone()))?;
        registry.register(Box::new(noc_sent.clone()))?;
        registry.register(Box::new(noc_suppressed.clone()))?;
        registry.register(Box::new(noc_send_failures.clone()))?;
        registry.register(Box::new(l2_writes.clone()))?;
        registry.register(Box::new(vector_size.clone()))?;
        registry.register(Box::new(vector_by_status.clone()))?;
        registry.register(Box::new(noc_queue_depth.clone()))?;
        registry.register(Box::new(breaker_state.clone()))?;
        registry.register(Box::new(grace_period_active.clone()))?;
        registry.register(Box::new(l2_available.clone()))?;
        registry.register(Box::new(k8s_poll_duration.clone()))?;
        registry.register(Box::new(snapshot_duration.clone()))?;

        Ok(Arc::new(Self {
            registry,
            received,
            filtered,
            push_rejected,
            created,
            resolved,
            unknown,
            noc_decisions,
            noc_sent,
            noc_suppressed,
            noc_send_failures,
            l2_writes,
            vector_size,
            vector_by_status,
            noc_queue_depth,
            breaker_state,
            grace_period_active,
            l2_available,
            k8s_poll_duration,
            snapshot_duration,
        }))
    }

    /// One push alert received.
    pub fn alert_received(&self) {
        self.received.inc();
    }

    /// One push alert dropped by the platform filter.
    pub fn alert_filtered(&self) {
        self.filtered.inc();
    }

    /// One push body rejected at the ingress.
    pub fn push_rejected(&self) {
        self.push_rejected.inc();
    }

    /// A vector entry entered the given status (new entry or status change).
    pub fn alert_status_entered(&self, status: AlertStatus) {
        match status {
            AlertStatus::Create => self.created.inc(),
            AlertStatus::Unknown => self.unknown.inc(),
            AlertStatus::Cancel | AlertStatus::Ignore => {}
        }
    }

    /// A vector entry was removed.
    pub fn alert_resolved(&self) {
        self.resolved.inc();
    }

    /// A NOC decision of the given kind was enqueued.
    pub fn noc_decision(&self, kind: &str) {
        self.noc_decisions.with_label_values(&[kind]).inc();
    }

    /// One alert dispatched to NOC.
    pub fn noc_sent(&self) {
        self.noc_sent.inc();
    }

    /// One dispatch withheld by suppression.
    pub fn noc_suppressed(&self) {
        self.noc_suppressed.inc();
    }

    /// One definitive NOC POST failure.
    pub fn noc_send_failed(&self) {
        self.noc_send_failures.inc();
    }

    /// L2 write outcome.
    pub fn l2_write(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.l2_writes.with_label_values(&[outcome]).inc();
    }

    /// Update the vector size and per-status gauges from a snapshot.
    pub fn set_vector_gauges(&self, total: usize, by_status: &[(AlertStatus, usize)]) {
        #[allow(clippy::cast_possible_wrap)]
        self.vector_size.set(total as i64);
        for (status, count) in by_status {
            #[allow(clippy::cast_possible_wrap)]
            self.vector_by_status
                .with_label_values(&[&status.to_string()])
                .set(*count as i64);
        }
    }

    /// Update the NOC queue depth gauge.
    pub fn set_queue_depth(&self, depth: usize) {
        #[allow(clippy::cast_possible_wrap)]
        self.noc_queue_depth.set(depth as i64);
    }

    /// Update a breaker state gauge.
    pub fn set_breaker_state(&self, breaker: &str, code: i64) {
        self.breaker_state.with_label_values(&[breaker]).set(code);
    }

    /// Update the grace-period gauge.
    pub fn set_grace_period_active(&self, active: bool) {
        self.grace_period_active.set(i64::from(active));
    }

    /// Update the L2 availability gauge.
    pub fn set_l2_available(&self, available: bool) {
        self.l2_available.set(i64::from(available));
    }

    /// Observe one Kubernetes poll duration.
    pub fn observe_k8s_poll(&self, seconds: f64) {
        self.k8s_poll_duration.observe(seconds);
    }

    /// Observe one snapshot duration.
    pub fn observe_snapshot(&self, seconds: f64) {
        self.snapshot_duration.observe(seconds);
    }

    /// Aggregate view of the counters and gauges.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.get(),
            filtered: self.filtered.get(),
            push_rejected: self.push_rejected.get(),
            created: self.created.get(),
            resolved: self.resolved.get(),
            unknown: self.unknown.get(),
            noc_sent: self.noc_sent.get(),
            noc_suppressed: self.noc_suppressed.get(),
            noc_send_failures: self.noc_send_failures.get(),
            l2_write_success: self.l2_writes.with_label_values(&["success"]).get(),
            l2_write_failure: self.l2_writes.with_label_values(&["failure"]).get(),
            vector_size: self.vector_size.get(),
            noc_queue_depth: self.noc_queue_depth.get(),
            grace_period_active: self.grace_period_active.get() != 0,
            l2_available: self.l2_available.get() != 0,
        }
    }

    /// Encode the registry in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}
