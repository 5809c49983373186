//! Pupil configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use argus_core::duration::serde_str;
use argus_core::noc::NocClientConfig;
use argus_core::watchdog::WatchdogConfig;
use serde::{Deserialize, Serialize};

/// Listener options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Whether to terminate TLS.
    #[serde(default)]
    pub use_https: bool,

    /// PEM certificate path, required when `use_https` is set.
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,

    /// PEM private key path, required when `use_https` is set.
    #[serde(default)]
    pub certificate_key_path: Option<PathBuf>,

    /// Path the worker posts to.
    #[serde(default = "default_endpoint_path")]
    pub endpoint_path: String,

    /// Expected `X-API-Key` value; unset disables the check.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8181
}

fn default_endpoint_path() -> String {
    "/pupil".to_string()
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            use_https: false,
            certificate_path: None,
            certificate_key_path: None,
            endpoint_path: default_endpoint_path(),
            api_key: None,
        }
    }
}

/// Event handler fan-out options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHandlerConfig {
    /// Per-handler watchdog timeout.
    #[serde(default = "default_handler_timeout")]
    #[serde(with = "serde_str")]
    pub handler_timeout: Duration,

    /// Concurrent handler workers; the event queue holds twice this many.
    #[serde(default = "default_max_concurrent_handlers")]
    pub max_concurrent_handlers: usize,
}

const fn default_handler_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_max_concurrent_handlers() -> usize {
    2
}

impl Default for EventHandlerConfig {
    fn default() -> Self {
        Self {
            handler_timeout: default_handler_timeout(),
            max_concurrent_handlers: default_max_concurrent_handlers(),
        }
    }
}

/// Recovery persistence options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding the recovery file.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Recovery file name.
    pub recovery_file_name: String,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/argus-pupil")
}

/// Full pupil configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PupilConfig {
    /// Listener options.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// NOC client options.
    pub noc_client: NocClientConfig,

    /// Watchdog options.
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Recovery persistence options.
    pub persistence: PersistenceConfig,

    /// Event handler options.
    #[serde(default)]
    pub event_handler: EventHandlerConfig,
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

    /// NOC client options invalid.
    #[error(transparent)]
    NocClient(#[from] argus_core::noc::NocClientConfigError),

    /// Watchdog options invalid.
    #[error(transparent)]
    Watchdog(#[from] argus_core::watchdog::WatchdogConfigError),

    /// A field failed a range check.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl PupilConfig {
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
        self.noc_client.validate()?;
        self.watchdog.validate()?;

        if self.listener.port == 0 {
            return Err(ConfigError::Invalid(
                "listener.port must not be 0".to_string(),
            ));
        }
        if self.listener.use_https
            && (self.listener.certificate_path.is_none()
                || self.listener.certificate_key_path.is_none())
        {
            return Err(ConfigError::Invalid(
                "listener.use_https requires certificate_path and certificate_key_path"
                    .to_string(),
            ));
        }
        if !self.listener.endpoint_path.starts_with('/') {
            return Err(ConfigError::Invalid(
                "listener.endpoint_path must start with '/'".to_string(),
            ));
        }
        if self.persistence.recovery_file_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "persistence.recovery_file_name is required".to_string(),
            ));
        }
        if self.event_handler.handler_timeout < Duration::from_secs(1) {
            return Err(ConfigError::Invalid(
                "event_handler.handler_timeout must be at least 1s".to_string(),
            ));
        }
        if self.event_handler.max_concurrent_handlers == 0 {
            return Err(ConfigError::Invalid(
                "event_handler.max_concurrent_handlers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
