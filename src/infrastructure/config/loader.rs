use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::infrastructure::logging::parse_log_level;

/// Directory holding the project configuration files.
pub const CONFIG_DIR: &str = ".query-store";

/// Prefix of environment overrides, e.g. `QUERY_STORE_API__BASE_URL`.
pub const ENV_PREFIX: &str = "QUERY_STORE_";

/// Configuration error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Base URL cannot be empty")]
    EmptyBaseUrl,

    #[error("Invalid base URL: {0}. Must start with http:// or https://")]
    InvalidBaseUrl(String),

    #[error("Invalid timeout_secs: {0}. Must be at least 1")]
    InvalidTimeout(u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .query-store/config.yaml (project config)
    /// 3. .query-store/local.yaml (local overrides, optional)
    /// 4. Environment variables (QUERY_STORE_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment(None)
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file instead of the project
    /// files. Environment overrides still apply.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let config: Config = Self::figment(Some(path))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(file: Option<&Path>) -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        let figment = match file {
            Some(path) => figment.merge(Yaml::file(path)),
            None => figment
                .merge(Yaml::file(Path::new(CONFIG_DIR).join("config.yaml")))
                .merge(Yaml::file(Path::new(CONFIG_DIR).join("local.yaml"))),
        };
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let base_url = config.api.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(config.api.base_url.clone()));
        }

        if config.api.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout(config.api.timeout_secs));
        }

        if parse_log_level(&config.logging.level).is_err() {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::LogFormat;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_validate_empty_base_url() {
        let mut config = Config::default();
        config.api.base_url = "  ".to_string();
        assert_eq!(ConfigLoader::validate(&config), Err(ConfigError::EmptyBaseUrl));
    }

    #[test]
    fn test_validate_base_url_scheme() {
        let mut config = Config::default();
        config.api.base_url = "localhost:4000/api".to_string();

        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidBaseUrl(url)) => assert_eq!(url, "localhost:4000/api"),
            other => panic!("Expected InvalidBaseUrl error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.api.timeout_secs = 0;
        assert_eq!(ConfigLoader::validate(&config), Err(ConfigError::InvalidTimeout(0)));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();

        match ConfigLoader::validate(&config) {
            Err(ConfigError::InvalidLogLevel(level)) => assert_eq!(level, "loud"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_from_file_merges_over_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "api:\n  base_url: https://users.example.com/api\ncache:\n  keep_unused_for_secs: 5\nlogging:\n  format: json"
        )
        .unwrap();
        file.flush().unwrap();

        let config = temp_env::with_vars_unset(["QUERY_STORE_API__BASE_URL", "QUERY_STORE_CACHE__KEEP_UNUSED_FOR_SECS"], || {
            ConfigLoader::load_from_file(file.path()).unwrap()
        });

        assert_eq!(config.api.base_url, "https://users.example.com/api");
        assert_eq!(config.api.timeout_secs, 30, "Default should persist");
        assert_eq!(config.cache.keep_unused_for_secs, 5);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "api:\n  timeout_secs: 10\ncache:\n  refetch_stale_after_secs: 15").unwrap();
        file.flush().unwrap();

        let config = temp_env::with_vars(
            [
                ("QUERY_STORE_API__TIMEOUT_SECS", Some("3")),
                ("QUERY_STORE_LOGGING__LEVEL", Some("debug")),
            ],
            || ConfigLoader::load_from_file(file.path()).unwrap(),
        );

        assert_eq!(config.api.timeout_secs, 3, "Environment should win");
        assert_eq!(config.cache.refetch_stale_after_secs, 15);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_file_value_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "api:\n  base_url: ftp://example.com").unwrap();
        file.flush().unwrap();

        let err = temp_env::with_var_unset("QUERY_STORE_API__BASE_URL", || {
            ConfigLoader::load_from_file(file.path()).unwrap_err()
        });
        assert!(err.to_string().contains("ftp://example.com"));
    }
}
