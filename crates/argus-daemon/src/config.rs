//! Daemon configuration: TOML file deserialized into per-component option
//! structs, each carrying its own defaults and validation.

use std::path::Path;
use std::time::Duration;

use argus_core::duration::serde_str;
use argus_core::watchdog::WatchdogConfig;
use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorConfig;
use crate::k8s::K8sLayerConfig;
use crate::noc::NocConfig;
use crate::persistence::HazelcastConfig;

/// Ingress HTTP options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Alerts vector options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsVectorConfig {
    /// TTL after which a CREATE entry without fresh reports is evicted.
    #[serde(default = "default_alert_ttl")]
    #[serde(with = "serde_str")]
    pub alert_ttl: Duration,
}

const fn default_alert_ttl() -> Duration {
    Duration::from_secs(3600)
}

impl Default for AlertsVectorConfig {
    fn default() -> Self {
        Self {
            alert_ttl: default_alert_ttl(),
        }
    }
}

/// Full daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Ingress HTTP options.
    #[serde(default)]
    pub http: HttpConfig,

    /// Coordinator options.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Watchdog options.
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// NOC pipeline options.
    pub noc: NocConfig,

    /// Kubernetes layer options.
    pub k8s_layer: K8sLayerConfig,

    /// Alerts vector options.
    #[serde(default)]
    pub alerts_vector: AlertsVectorConfig,

    /// L2 options.
    #[serde(default)]
    pub hazelcast: HazelcastConfig,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for the expected shape.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Watchdog options invalid.
    #[error(transparent)]
    Watchdog(#[from] argus_core::watchdog::WatchdogConfigError),

    /// NOC options invalid.
    #[error(transparent)]
    Noc(#[from] crate::noc::NocConfigError),

    /// A field failed a range check.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl DaemonConfig {
    /// Load and validate a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, parse failure, or invalid values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.watchdog.validate()?;
        self.noc.validate()?;

        if self.http.port == 0 {
            return Err(ConfigError::Invalid("http.port must not be 0".to_string()));
        }
        if self.k8s_layer.restart_tracking.window_size < 2 {
            return Err(ConfigError::Invalid(
                "k8s_layer.restart_tracking.window_size must be at least 2".to_string(),
            ));
        }
        if self.hazelcast.batch_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "hazelcast.batch_window_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
