use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
pub struct LoggingConfig {
    pub log_to_file: bool,
    #[serde(default = "default_log_file_path")]
    pub log_file_path: String,
}

/// Default log file path when file logging is enabled
fn default_log_file_path() -> String {
    "waystation.log".to_string()
}
