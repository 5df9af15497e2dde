//! Configuration management for rmlink.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Client configuration: timeouts, polling cadence, device port, logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// UDP port the devices listen on.
    #[serde(default = "default_device_port")]
    pub device_port: u16,

    /// Per-address wait for a discovery reply.
    #[serde(default = "default_discovery_timeout", with = "humantime_serde")]
    pub discovery_timeout: Duration,

    /// Wait for the Ready event after sending the handshake.
    #[serde(default = "default_ready_timeout", with = "humantime_serde")]
    pub ready_timeout: Duration,

    /// Wait for a command acknowledgement.
    #[serde(default = "default_ack_timeout", with = "humantime_serde")]
    pub ack_timeout: Duration,

    /// Overall bound on waiting for a data payload.
    #[serde(default = "default_data_timeout", with = "humantime_serde")]
    pub data_timeout: Duration,

    /// Cadence of the check-data re-query while a data wait is pending.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_device_port() -> u16 {
    80
}
fn default_discovery_timeout() -> Duration {
    Duration::from_secs(2)
}
fn default_ready_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_ack_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_data_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            device_port: default_device_port(),
            discovery_timeout: default_discovery_timeout(),
            ready_timeout: default_ready_timeout(),
            ack_timeout: default_ack_timeout(),
            data_timeout: default_data_timeout(),
            poll_interval: default_poll_interval(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval must be nonzero".into()));
        }
        if self.data_timeout < self.poll_interval {
            return Err(Error::Config(
                "data_timeout must be at least one poll_interval".into(),
            ));
        }
        if self.discovery_timeout.is_zero() || self.ready_timeout.is_zero() {
            return Err(Error::Config("timeouts must be nonzero".into()));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(config.color))
        .try_init()
        .map_err(|e| Error::Config(format!("failed to init logging: {e}")))?;

    Ok(())
}
