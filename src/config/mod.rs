mod tests;
mod station_config;
mod logging_config;
pub mod config;

pub use config::{Config, ConfigError, DestinationConfig, ExportConfig, ProcessorConfig, StoreConfig};
pub use logging_config::LoggingConfig;
pub use station_config::StationConfig;

/// Structure representing application startup arguments.
#[derive(Debug)]
pub struct Cli {
    /// Path to the configuration file.
    pub config_path: String,
}

impl Cli {
    pub fn new(config_path: String) -> Self {
        Self { config_path }
    }
}
