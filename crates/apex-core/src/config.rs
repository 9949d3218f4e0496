//! Collector configuration and management

use crate::{ApexError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use url::Url;

/// Ingestion endpoint used by every installation outside collector development.
pub const PRODUCTION_ENDPOINT: &str = "https://apextoolbox.com/api/v1/telemetry";

/// Host name of the ingestion service; calls to it are never tracked.
pub const INGESTION_HOST: &str = "apextoolbox.com";

/// Main collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Global enable/disable toggle
    pub enabled: bool,

    /// Project token; collection stays off while this is empty
    pub token: String,

    /// Record outgoing HTTP calls made through tracked clients
    pub track_http_requests: bool,

    /// Which request paths get their request/response captured
    pub path_filters: PathFilterConfig,

    /// Request header redaction
    pub headers: HeaderConfig,

    /// Request body redaction and size cap
    pub body: BodyConfig,

    /// Response body redaction
    pub response: ResponseConfig,

    /// Development-only endpoint override
    pub endpoint: EndpointConfig,

    /// The collector's own diagnostics and log capture
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathFilterConfig {
    /// Glob patterns a path must match (any of)
    pub include: Vec<String>,

    /// Glob patterns that reject a path (checked first)
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderConfig {
    /// Ship headers unfiltered
    pub include_sensitive: bool,

    /// Header names dropped when `include_sensitive` is off
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Maximum JSON-encoded size (in bytes) of a captured body
    pub max_size: usize,

    /// Fields removed from request bodies
    pub exclude: Vec<String>,

    /// Fields whose values are replaced by the mask
    pub mask: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// Fields removed from JSON response bodies
    pub exclude: Vec<String>,

    /// Fields masked in JSON response bodies
    pub mask: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Must be set for `dev_endpoint` to take effect
    pub dev_mode: bool,

    /// Alternate ingestion URL for collector development
    pub dev_endpoint: Option<String>,
}

/// Diagnostics and log capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for the collector's own diagnostics
    pub level: LogLevel,

    /// Output format for diagnostics
    pub format: LogFormat,

    /// Minimum level of host events captured into the payload
    pub capture_level: LogLevel,

    /// Include source location in diagnostics
    pub include_location: bool,
}

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::TRACE => LogLevel::Trace,
            Level::DEBUG => LogLevel::Debug,
            Level::INFO => LogLevel::Info,
            Level::WARN => LogLevel::Warn,
            Level::ERROR => LogLevel::Error,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON format
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    Compact,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: String::new(),
            track_http_requests: true,
            path_filters: PathFilterConfig::default(),
            headers: HeaderConfig::default(),
            body: BodyConfig::default(),
            response: ResponseConfig::default(),
            endpoint: EndpointConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PathFilterConfig {
    fn default() -> Self {
        Self {
            include: vec!["api/*".to_string()],
            exclude: Vec::new(),
        }
    }
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            include_sensitive: false,
            exclude: vec![
                "authorization".to_string(),
                "x-api-key".to_string(),
                "cookie".to_string(),
            ],
        }
    }
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            max_size: 10240,
            exclude: vec![
                "password".to_string(),
                "password_confirmation".to_string(),
                "token".to_string(),
                "secret".to_string(),
            ],
            mask: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            format: LogFormat::Compact,
            capture_level: LogLevel::Debug,
            include_location: false,
        }
    }
}

impl CollectorConfig {
    /// Build a config with the given token and defaults for everything else
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    /// Load configuration from file or create default
    pub async fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        let mut config = if config_file.exists() {
            info!("Loading collector config from: {}", config_file.display());
            let content = tokio::fs::read_to_string(&config_file)
                .await
                .map_err(|e| ApexError::FileRead {
                    path: config_file.display().to_string(),
                    source: e,
                })?;
            toml::from_str::<CollectorConfig>(&content).map_err(|e| {
                ApexError::ConfigLoadFailed {
                    path: config_file.display().to_string(),
                    source: Box::new(e),
                }
            })?
        } else {
            info!("No collector config file found, using defaults");
            Self::default()
        };

        config.load_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config_path: Option<&Path>) -> Result<()> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if let Some(parent) = config_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| ApexError::Config {
            message: format!("Failed to serialize collector config: {}", e),
        })?;

        tokio::fs::write(&config_file, content).await?;
        Ok(())
    }

    /// Load environment variable overrides
    pub fn load_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("APEX_TOOLBOX_ENABLED") {
            self.enabled = enabled.parse().unwrap_or(self.enabled);
        }

        if let Ok(token) = std::env::var("APEX_TOOLBOX_TOKEN") {
            self.token = token;
        }

        if let Ok(endpoint) = std::env::var("APEX_TOOLBOX_DEV_ENDPOINT") {
            if !endpoint.is_empty() {
                self.endpoint.dev_endpoint = Some(endpoint);
            }
        }

        if let Ok(dev_mode) = std::env::var("APEX_TOOLBOX_DEV_MODE") {
            self.endpoint.dev_mode = dev_mode == "true";
        }

        if let Ok(level) = std::env::var("APEX_TOOLBOX_LOG_LEVEL") {
            self.logging.level = match level.to_uppercase().as_str() {
                "TRACE" => LogLevel::Trace,
                "DEBUG" => LogLevel::Debug,
                "INFO" => LogLevel::Info,
                "WARN" => LogLevel::Warn,
                "ERROR" => LogLevel::Error,
                _ => self.logging.level,
            };
        }

        if let Ok(format) = std::env::var("APEX_TOOLBOX_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                "compact" => LogFormat::Compact,
                _ => self.logging.format,
            };
        }
    }

    /// Global flag and token together decide whether anything is collected
    pub fn is_active(&self) -> bool {
        self.enabled && !self.token.is_empty()
    }

    /// The ingestion URL payloads are posted to.
    ///
    /// The development override only applies when `dev_mode` is also set, so a stray
    /// environment variable cannot redirect production traffic.
    pub fn endpoint_url(&self) -> &str {
        match (&self.endpoint.dev_endpoint, self.endpoint.dev_mode) {
            (Some(url), true) if !url.is_empty() => url,
            _ => PRODUCTION_ENDPOINT,
        }
    }

    /// Whether `url` points at the ingestion service itself
    pub fn is_ingestion_url(&self, url: &str) -> bool {
        if url.starts_with(self.endpoint_url()) {
            return true;
        }

        Url::parse(url)
            .ok()
            .and_then(|parsed| {
                parsed.host_str().map(|host| {
                    host == INGESTION_HOST
                        || host
                            .strip_suffix(INGESTION_HOST)
                            .is_some_and(|sub| sub.ends_with('.'))
                })
            })
            .unwrap_or(false)
    }

    fn default_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "apextoolbox", "apex-toolbox").ok_or_else(
            || ApexError::ConfigInvalid {
                issue: "Could not determine config directory".to_string(),
                suggestion: "Pass an explicit config path".to_string(),
            },
        )?;

        Ok(project_dirs.config_dir().join("collector.toml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.body.max_size == 0 {
            return Err(ApexError::Config {
                message: "body.max_size must be greater than 0".to_string(),
            });
        }

        if let (true, Some(url)) = (self.endpoint.dev_mode, &self.endpoint.dev_endpoint) {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ApexError::ConfigInvalid {
                    issue: format!("dev endpoint '{}' is not an http(s) URL", url),
                    suggestion: "Use a full URL such as http://localhost:8000/api".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = CollectorConfig::default();

        assert!(config.enabled);
        assert!(config.token.is_empty());
        assert!(!config.is_active());
        assert_eq!(config.path_filters.include, vec!["api/*"]);
        assert!(config.path_filters.exclude.is_empty());
        assert!(!config.headers.include_sensitive);
        assert_eq!(
            config.headers.exclude,
            vec!["authorization", "x-api-key", "cookie"]
        );
        assert_eq!(config.body.max_size, 10240);
        assert_eq!(
            config.body.exclude,
            vec!["password", "password_confirmation", "token", "secret"]
        );
        assert!(config.track_http_requests);
    }

    #[test]
    fn test_is_active_requires_token_and_flag() {
        let mut config = CollectorConfig::with_token("abc");
        assert!(config.is_active());

        config.enabled = false;
        assert!(!config.is_active());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: CollectorConfig = toml::from_str(
            r#"
            token = "custom-token"

            [path_filters]
            include = ["webhook/*"]

            [body]
            max_size = 5120
            "#,
        )
        .unwrap();

        assert_eq!(config.token, "custom-token");
        assert_eq!(config.path_filters.include, vec!["webhook/*"]);
        assert!(config.path_filters.exclude.is_empty());
        assert_eq!(config.body.max_size, 5120);
        assert_eq!(config.body.exclude, BodyConfig::default().exclude);
        assert_eq!(config.headers.exclude, HeaderConfig::default().exclude);
    }

    #[test]
    fn test_endpoint_override_requires_dev_mode() {
        let mut config = CollectorConfig::default();
        config.endpoint.dev_endpoint = Some("http://localhost:9000/ingest".to_string());
        assert_eq!(config.endpoint_url(), PRODUCTION_ENDPOINT);

        config.endpoint.dev_mode = true;
        assert_eq!(config.endpoint_url(), "http://localhost:9000/ingest");
    }

    #[test]
    fn test_ingestion_url_detection() {
        let config = CollectorConfig::default();
        assert!(config.is_ingestion_url("https://apextoolbox.com/api/v1/telemetry"));
        assert!(config.is_ingestion_url("https://eu.apextoolbox.com/other"));
        assert!(!config.is_ingestion_url("https://api.example.com/users"));
        assert!(!config.is_ingestion_url("https://api.example.com/?ref=apextoolbox.com"));
        assert!(!config.is_ingestion_url("https://notapextoolbox.com/"));
        assert!(!config.is_ingestion_url("not a url"));
    }

    #[test]
    fn test_validation() {
        let mut config = CollectorConfig::default();
        assert!(config.validate().is_ok());

        config.body.max_size = 0;
        assert!(config.validate().is_err());

        config.body.max_size = 100;
        config.endpoint.dev_mode = true;
        config.endpoint.dev_endpoint = Some("localhost".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("APEX_TOOLBOX_TOKEN", "env-token");
        std::env::set_var("APEX_TOOLBOX_DEV_ENDPOINT", "http://localhost:8000/api");
        std::env::set_var("APEX_TOOLBOX_DEV_MODE", "true");
        std::env::set_var("APEX_TOOLBOX_LOG_LEVEL", "debug");

        let mut config = CollectorConfig::default();
        config.load_env_overrides();

        assert_eq!(config.token, "env-token");
        assert_eq!(config.endpoint_url(), "http://localhost:8000/api");
        assert_eq!(config.logging.level, LogLevel::Debug);

        std::env::remove_var("APEX_TOOLBOX_TOKEN");
        std::env::remove_var("APEX_TOOLBOX_DEV_ENDPOINT");
        std::env::remove_var("APEX_TOOLBOX_DEV_MODE");
        std::env::remove_var("APEX_TOOLBOX_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_dev_endpoint_ignored_without_flag() {
        std::env::set_var("APEX_TOOLBOX_DEV_ENDPOINT", "http://localhost:8000/api");
        std::env::remove_var("APEX_TOOLBOX_DEV_MODE");

        let mut config = CollectorConfig::default();
        config.load_env_overrides();

        assert_eq!(config.endpoint_url(), PRODUCTION_ENDPOINT);

        std::env::remove_var("APEX_TOOLBOX_DEV_ENDPOINT");
    }

    #[tokio::test]
    #[serial]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("collector.toml");

        let mut original = CollectorConfig::with_token("saved-token");
        original.body.mask = vec!["card_number".to_string()];
        original.save(Some(&config_path)).await.unwrap();

        let loaded = CollectorConfig::load(Some(&config_path)).await.unwrap();
        assert_eq!(loaded.token, "saved-token");
        assert_eq!(loaded.body.mask, vec!["card_number"]);
    }

    #[tokio::test]
    #[serial]
    async fn test_load_rejects_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("collector.toml");
        tokio::fs::write(&config_path, "enabled = \"maybe\"").await.unwrap();

        let result = CollectorConfig::load(Some(&config_path)).await;
        assert!(matches!(result, Err(ApexError::ConfigLoadFailed { .. })));
    }
}
