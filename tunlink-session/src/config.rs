//! Controller configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::service::DEFAULT_SOCKS_PORT;

fn default_socks_port() -> u16 {
    DEFAULT_SOCKS_PORT
}

fn default_descriptor_wait_attempts() -> u32 {
    50
}

fn default_descriptor_wait_interval_ms() -> u64 {
    100
}

fn default_stats_interval_secs() -> u64 {
    1
}

/// Configuration for the session controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Local SOCKS port offered to the engine
    #[serde(default = "default_socks_port")]
    pub socks_port: u16,

    /// Number of descriptor readiness polls before giving up
    #[serde(default = "default_descriptor_wait_attempts")]
    pub descriptor_wait_attempts: u32,

    /// Interval between descriptor readiness polls, in milliseconds
    #[serde(default = "default_descriptor_wait_interval_ms")]
    pub descriptor_wait_interval_ms: u64,

    /// Release the device and descriptor on disconnect
    ///
    /// Off by default: a disconnect keeps the established device so the next
    /// connect with the same device configuration skips the establish step.
    #[serde(default)]
    pub full_teardown_on_disconnect: bool,

    /// Interval between statistics reports while connected, in seconds
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,

    /// Directory for session log files; none disables the file log
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            socks_port: default_socks_port(),
            descriptor_wait_attempts: default_descriptor_wait_attempts(),
            descriptor_wait_interval_ms: default_descriptor_wait_interval_ms(),
            full_teardown_on_disconnect: false,
            stats_interval_secs: default_stats_interval_secs(),
            log_dir: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.socks_port == 0 {
            return Err(Error::Config("socks_port must be non-zero".into()));
        }
        if self.descriptor_wait_attempts == 0 {
            return Err(Error::Config(
                "descriptor_wait_attempts must be non-zero".into(),
            ));
        }
        if self.descriptor_wait_interval_ms == 0 {
            return Err(Error::Config(
                "descriptor_wait_interval_ms must be non-zero".into(),
            ));
        }
        if self.stats_interval_secs == 0 {
            return Err(Error::Config("stats_interval_secs must be non-zero".into()));
        }
        Ok(())
    }

    /// Total time budget for descriptor readiness
    pub fn descriptor_wait(&self) -> Duration {
        Duration::from_millis(
            self.descriptor_wait_interval_ms * u64::from(self.descriptor_wait_attempts),
        )
    }

    /// Interval between statistics reports
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}
