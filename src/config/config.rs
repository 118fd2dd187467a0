use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::config::{Cli, LoggingConfig, StationConfig};
use crate::transport::Address;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("station id must not be blank")]
    InvalidStationId,

    #[error("destination '{name}' has an invalid url: {reason}")]
    InvalidDestinationUrl { name: String, reason: String },

    #[error("destination '{0}' has a password but no username")]
    OrphanPassword(String),

    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration for the station.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    pub station: StationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    pub export: ExportConfig,
    /// Keyed by destination name; a station with no destinations still
    /// receives, reconciles and expires objects.
    #[serde(default)]
    pub destinations: BTreeMap<String, DestinationConfig>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StoreConfig {
    pub root_dir: String,
    /// 0 disables garbage collection.
    #[serde(default)]
    pub ttl_minutes: u64,
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_manifest_first")]
    pub manifest_first: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct ExportConfig {
    pub root_dir: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// When set, successfully transmitted payloads are copied here.
    pub archive_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DestinationConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
}

fn default_gc_interval_secs() -> u64 {
    3600
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_manifest_first() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    20
}

fn default_read_timeout_secs() -> u64 {
    120
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            manifest_first: default_manifest_first(),
        }
    }
}

impl Config {
    /// Reads the config path from argv (first argument, `waystation.toml`
    /// otherwise) and loads it. Startup-only; panics on a bad config.
    pub fn from_args() -> Self {
        let cli = Cli::new(
            std::env::args()
                .nth(1)
                .unwrap_or_else(|| "waystation.toml".to_string()),
        );
        match Self::load(&cli.config_path) {
            Ok(config) => config,
            Err(e) => panic!("cannot load config {}: {}", cli.config_path, e),
        }
    }

    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.station.id.trim().is_empty() {
            return Err(ConfigError::InvalidStationId);
        }
        for (name, dest) in &self.destinations {
            if let Err(e) = Address::parse(&dest.url) {
                return Err(ConfigError::InvalidDestinationUrl {
                    name: name.clone(),
                    reason: e.to_string(),
                });
            }
            if dest.password.is_some() && dest.username.is_none() {
                return Err(ConfigError::OrphanPassword(name.clone()));
            }
        }
        Ok(())
    }
}

impl StoreConfig {
    pub fn root_dir(&self) -> PathBuf {
        PathBuf::from(&self.root_dir)
    }

    /// `None` when garbage collection is disabled.
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_minutes > 0).then(|| Duration::from_secs(self.ttl_minutes * 60))
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }
}

impl ProcessorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl ExportConfig {
    pub fn root_dir(&self) -> PathBuf {
        PathBuf::from(&self.root_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn archive_dir(&self) -> Option<PathBuf> {
        self.archive_dir.as_ref().map(PathBuf::from)
    }
}

impl DestinationConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}
