use serde::Deserialize;

/// Identity and log level of this station.
#[derive(Debug, Deserialize, Default)]
pub struct StationConfig {
    pub id: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Default log level for the station configuration
fn default_log_level() -> String {
    "info".to_string()
}
