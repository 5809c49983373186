//! Normalised alert model.
//!
//! Every source (push ingress, Kubernetes poller, watchdog) produces the same
//! [`Alert`] shape, keyed by a stable fingerprint. Lower priority values sort
//! first; the three reserved negative priorities keep the layer and watchdog
//! alerts ahead of anything a rule can declare.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::duration::{parse_duration, serde_opt};

/// Priority of the Prometheus-pod-down layer alert.
pub const PRIORITY_PROMETHEUS_DOWN: i64 = -3;

/// Priority of the kube-state-metrics-pod-down layer alert.
pub const PRIORITY_KSM_DOWN: i64 = -2;

/// Priority of the watchdog-expired alert.
pub const PRIORITY_WATCHDOG: i64 = -1;

/// Priority assigned when a push alert declares none.
pub const PRIORITY_UNSPECIFIED: i64 = i64::MAX;

/// Annotation key carrying a per-alert suppression window.
pub const SUPPRESS_WINDOW_ANNOTATION: &str = "suppress_window";

/// Lifecycle status of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    /// An active condition worth NOC attention.
    Create,
    /// The condition cleared; NOC should withdraw it.
    Cancel,
    /// Known and healthy; never dispatched.
    Ignore,
    /// The source cannot tell; dispatched once, then dropped.
    Unknown,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Cancel => write!(f, "CANCEL"),
            Self::Ignore => write!(f, "IGNORE"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// NOC dispatch behaviour a source attaches to an alert for one status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NocBehavior {
    /// Whether the alert should reach the NOC endpoint at all.
    #[serde(default)]
    pub send_to_noc: bool,

    /// Opaque payload forwarded verbatim.
    #[serde(default)]
    pub payload: String,

    /// Minimum interval between two dispatches of the same fingerprint.
    #[serde(default)]
    #[serde(with = "serde_opt")]
    pub suppress_window: Option<Duration>,
}

/// A normalised alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Dispatch priority; lower sorts first.
    pub priority: i64,

    /// Rule or subsystem name.
    pub name: String,

    /// One-line human summary.
    pub summary: String,

    /// Longer description.
    #[serde(default)]
    pub description: String,

    /// Opaque payload forwarded to NOC.
    #[serde(default)]
    pub payload: String,

    /// Producing source (`prometheus_push`, `k8s_layer`, `watchdog`).
    pub source: String,

    /// Stable identity; at most one vector entry per fingerprint.
    pub fingerprint: String,

    /// Lifecycle status.
    pub status: AlertStatus,

    /// Whether NOC dispatch is requested for this alert.
    #[serde(default)]
    pub send_to_noc: bool,

    /// Per-alert suppression window override.
    #[serde(default)]
    #[serde(with = "serde_opt")]
    pub suppress_window: Option<Duration>,

    /// When the condition started.
    pub timestamp: DateTime<Utc>,

    /// Last time any source reported this fingerprint.
    pub last_seen: DateTime<Utc>,

    /// Free-form annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Lifecycle-scoped trace correlator.
    #[serde(default)]
    pub execution_id: String,

    /// Original push payload, when the alert came from the push ingress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<serde_json::Value>,
}

impl Alert {
    /// Snapshot ordering key: priority ascending, then earlier timestamp.
    #[must_use]
    pub fn sort_key(&self) -> (i64, DateTime<Utc>) {
        (self.priority, self.timestamp)
    }
}

/// Deterministic fingerprint for a label set: SHA-256 hex over the canonical
/// label string (keys sorted, `key=value` lines joined with newlines).
#[must_use]
pub fn fingerprint_labels(labels: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    let mut first = true;
    for (key, value) in labels {
        if !first {
            hasher.update(b"\n");
        }
        first = false;
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

/// Label key identifying the rule name.
const ALERTNAME_LABEL: &str = "alertname";

/// Label key identifying the owning platform.
const PLATFORM_LABEL: &str = "platform";

/// Label key carrying the declared numeric priority.
const PRIORITY_LABEL: &str = "priority";

/// A push alert as received on `POST /api/v2/alerts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAlert {
    /// Explicit firing state, when the sender provides one.
    #[serde(default)]
    pub status: Option<String>,

    /// NOC dispatch request; defaults to true for firing alerts.
    #[serde(default)]
    pub send_to_noc: Option<bool>,

    /// Suppression window in the duration grammar.
    #[serde(default)]
    pub suppress_window: Option<String>,

    /// Identifying labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Annotations (summary, description, overrides).
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// When the condition started.
    pub starts_at: DateTime<Utc>,

    /// When the condition ended, if it has.
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,

    /// Source expression URL.
    #[serde(default, rename = "generatorURL")]
    pub generator_url: Option<String>,
}

impl PushAlert {
    /// Rule name from the `alertname` label.
    #[must_use]
    pub fn name(&self) -> &str {
        self.labels
            .get(ALERTNAME_LABEL)
            .map_or("", String::as_str)
    }

    /// Owning platform from the `platform` label.
    #[must_use]
    pub fn platform(&self) -> &str {
        self.labels.get(PLATFORM_LABEL).map_or("", String::as_str)
    }

    /// Declared numeric priority; absent or unparsable maps to
    /// [`PRIORITY_UNSPECIFIED`].
    #[must_use]
    pub fn priority(&self) -> i64 {
        self.labels
            .get(PRIORITY_LABEL)
            .and_then(|p| p.parse().ok())
            .unwrap_or(PRIORITY_UNSPECIFIED)
    }

    /// Whether the alert is currently firing.
    ///
    /// An explicit `status` field wins; otherwise the alert fires while
    /// `endsAt` is absent, the zero time, or in the future.
    #[must_use]
    pub fn is_firing(&self) -> bool {
        if let Some(status) = &self.status {
            return status.eq_ignore_ascii_case("firing");
        }
        match self.ends_at {
            None => true,
            Some(ends_at) => {
                let zero = Utc.timestamp_opt(0, 0).single().unwrap_or_default();
                ends_at <= zero || ends_at > Utc::now()
            }
        }
    }

    /// Normalise into an [`Alert`].
    ///
    /// The fingerprint is derived from the full label set; firing alerts map
    /// to CREATE, resolved ones to CANCEL.
    #[must_use]
    pub fn to_alert(&self, execution_id: &str) -> Alert {
        let name = self.name().to_string();
        let summary = self
            .annotations
            .get("summary")
            .cloned()
            .unwrap_or_else(|| name.clone());
        let description = self
            .annotations
            .get("description")
            .cloned()
            .unwrap_or_default();
        let status = if self.is_firing() {
            AlertStatus::Create
        } else {
            AlertStatus::Cancel
        };
        let suppress_window = self
            .suppress_window
            .as_deref()
            .and_then(|w| parse_duration(w).ok());

        Alert {
            priority: self.priority(),
            name,
            summary,
            description,
            payload: self.generator_url.clone().unwrap_or_default(),
            source: "prometheus_push".to_string(),
            fingerprint: fingerprint_labels(&self.labels),
            status,
            send_to_noc: self.send_to_noc.unwrap_or(true),
            suppress_window,
            timestamp: self.starts_at,
            last_seen: self.starts_at,
            annotations: self.annotations.clone(),
            execution_id: execution_id.to_string(),
            prometheus: serde_json::to_value(self).ok(),
        }
    }
}
