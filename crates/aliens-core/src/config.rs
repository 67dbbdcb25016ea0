//! Configuration for the client services.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default backend base URL (can be overridden at compile time via the
/// ALIENS_BACKEND_URL env var).
pub const DEFAULT_BACKEND_URL: &str = match option_env!("ALIENS_BACKEND_URL") {
    Some(url) => url,
    None => "http://127.0.0.1:8090",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Backend base URL.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Shared secret gating the expired-guest cleanup sweep. Cleanup is
    /// refused when unset.
    #[serde(default)]
    pub cleanup_token: Option<String>,
    /// When true, login/registration errors include the backend's own
    /// message instead of the generic one. The generic default matches the
    /// original behavior of never telling the user which part failed.
    #[serde(default)]
    pub verbose_auth_errors: bool,
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            cleanup_token: None,
            verbose_auth_errors: false,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file under `paths`, falling back to
    /// defaults, then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file under `paths`.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let config_path = paths.config_file();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("ALIENS_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(url) = std::env::var("ALIENS_BACKEND_URL") {
            self.backend_url = url;
        }
        if let Ok(token) = std::env::var("ALIENS_CLEANUP_TOKEN") {
            if !token.trim().is_empty() {
                self.cleanup_token = Some(token);
            }
        }
    }

    /// Get the backend URL as a parsed URL.
    pub fn backend_url(&self) -> CoreResult<Url> {
        Url::parse(&self.backend_url).map_err(CoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
        assert!(config.cleanup_token.is_none());
        assert!(!config.verbose_auth_errors);
    }

    #[test]
    fn test_config_load_from_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "backend_url": "https://aliens.example.com",
            "verbose_auth_errors": true
        }"#;

        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.backend_url, "https://aliens.example.com");
        assert!(config.verbose_auth_errors);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.log_level = "trace".to_string();
        config.cleanup_token = Some("sweep-secret".to_string());

        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        assert_eq!(loaded.log_level, "trace");
        assert_eq!(loaded.cleanup_token.as_deref(), Some("sweep-secret"));
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
    }

    #[test]
    fn test_config_backend_url_parse() {
        let config = Config::default();
        let url = config.backend_url().unwrap();
        assert!(url.scheme() == "http" || url.scheme() == "https");
    }

    #[test]
    fn test_config_invalid_url() {
        let mut config = Config::default();
        config.backend_url = "not a valid url".to_string();

        let result = config.backend_url();
        assert!(result.is_err());
    }
}
