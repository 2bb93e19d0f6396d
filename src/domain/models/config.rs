use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for query-store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Users service connection
    #[serde(default)]
    pub api: ApiConfig,

    /// Cache lifetimes
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for the users service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ApiConfig {
    /// Base URL every request path is appended to
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:4000/api".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Cache lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    /// Seconds an entry without subscribers is kept before eviction
    #[serde(default = "default_keep_unused_for_secs")]
    pub keep_unused_for_secs: u64,

    /// Age in seconds after which cached data is refreshed in the background
    /// on the next `ensure`. 0 disables background refresh.
    #[serde(default = "default_refetch_stale_after_secs")]
    pub refetch_stale_after_secs: u64,
}

const fn default_keep_unused_for_secs() -> u64 {
    60
}

const fn default_refetch_stale_after_secs() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            keep_unused_for_secs: default_keep_unused_for_secs(),
            refetch_stale_after_secs: default_refetch_stale_after_secs(),
        }
    }
}

impl CacheConfig {
    pub fn keep_unused_for(&self) -> Duration {
        Duration::from_secs(self.keep_unused_for_secs)
    }

    pub fn refetch_stale_after(&self) -> Option<Duration> {
        (self.refetch_stale_after_secs > 0).then(|| Duration::from_secs(self.refetch_stale_after_secs))
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Console format (json, pretty)
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for rolling log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Also log to the console when a log directory is set
    #[serde(default = "default_true")]
    pub enable_console: bool,

    #[serde(default)]
    pub rotation: RotationPolicy,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            enable_console: true,
            rotation: RotationPolicy::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://localhost:4000/api");
        assert_eq!(config.cache.keep_unused_for(), Duration::from_secs(60));
        assert_eq!(config.cache.refetch_stale_after(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_zero_disables_background_refresh() {
        let cache = CacheConfig {
            refetch_stale_after_secs: 0,
            ..Default::default()
        };
        assert_eq!(cache.refetch_stale_after(), None);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r"
api:
  base_url: http://127.0.0.1:5000/api
cache:
  keep_unused_for_secs: 5
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.api.base_url, "http://127.0.0.1:5000/api");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.cache.keep_unused_for_secs, 5);
        assert_eq!(config.cache.refetch_stale_after_secs, 30);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_logging_yaml() {
        let yaml = r"
logging:
  level: debug
  format: json
  log_dir: /var/log/query-store
  rotation: hourly
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.rotation, RotationPolicy::Hourly);
        assert_eq!(config.logging.log_dir, Some(PathBuf::from("/var/log/query-store")));
        assert!(config.logging.enable_console);
    }
}
