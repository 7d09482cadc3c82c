pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// How advisory `status` frames take part in response classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusClassification {
    /// Status text containing an image keyword opens an image placeholder.
    #[default]
    Keywords,
    /// Status frames never classify a request.
    Ignore,
}

impl fmt::Display for StatusClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusClassification::Keywords => write!(f, "keywords"),
            StatusClassification::Ignore => write!(f, "ignore"),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
    #[serde(default = "default_fallback_path")]
    pub fallback_path: String,
    /// Upper bound on a whole request, body streaming included.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_progress_tick_ms")]
    pub progress_tick_ms: u64,
    #[serde(default)]
    pub status_classification: StatusClassification,
    #[serde(default = "default_status_image_keywords")]
    pub status_image_keywords: Vec<String>,
    #[serde(default = "default_true")]
    pub drop_cancelled_placeholders: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_stream_path() -> String {
    "/chat/stream".to_string()
}
fn default_fallback_path() -> String {
    "/chat/".to_string()
}
fn default_request_timeout_secs() -> u64 {
    300
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_progress_tick_ms() -> u64 {
    250
}
fn default_status_image_keywords() -> Vec<String> {
    ["image", "generating", "drawing", "mask"]
        .into_iter()
        .map(ToString::to_string)
        .collect()
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            stream_path: default_stream_path(),
            fallback_path: default_fallback_path(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            progress_tick_ms: default_progress_tick_ms(),
            status_classification: StatusClassification::default(),
            status_image_keywords: default_status_image_keywords(),
            drop_cancelled_placeholders: true,
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    /// Default config pointed at another backend.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn stream_url(&self) -> String {
        join_url(&self.base_url, &self.stream_path)
    }

    #[must_use]
    pub fn fallback_url(&self) -> String {
        join_url(&self.base_url, &self.fallback_path)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<ClientConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Same as [`load_config`], minus the I/O case.
pub fn parse_config(contents: &str) -> Result<ClientConfig, ConfigError> {
    let config: ClientConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
