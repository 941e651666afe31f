use serde::{Deserialize, Serialize};

use super::defaults::{default_log_dir, default_log_filename, default_log_format, default_log_level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Logging configuration, loaded the same way as the rest of `HubConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    /// When set, logs are additionally written to a daily-rotating file in
    /// this directory (`tracing-appender`), alongside stdout.
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_log_filename")]
    pub filename: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
            dir: None,
            filename: default_log_filename(),
        }
    }
}

impl LoggingConfig {
    /// A config with file logging enabled, handy for tests/operators who
    /// want to opt into the rolling-file layer explicitly.
    pub fn with_file_logging() -> Self {
        Self {
            dir: Some(default_log_dir()),
            ..Self::default()
        }
    }
}
