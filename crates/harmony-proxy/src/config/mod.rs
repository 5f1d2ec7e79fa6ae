use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{HarmonyError, Result};

/// Environment variable holding the upstream MLX server base URL
pub const UPSTREAM_URL_ENV: &str = "MLX_SERVER_URL";
/// Environment variable holding the log verbosity
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
/// Environment variable holding the listen address
pub const LISTEN_ADDR_ENV: &str = "HARMONY_LISTEN_ADDR";

/// Main configuration structure for harmony-proxy
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP proxy configuration
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// HTTP proxy server configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProxyConfig {
    /// Address to listen on (e.g., "0.0.0.0:8585")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Base URL of the upstream OpenAI-compatible API, including the `/v1` prefix
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    /// Timeout for the model listing call in seconds
    ///
    /// Chat completions are never timed out.
    #[serde(default = "default_models_timeout_secs")]
    pub models_timeout_secs: u64,
    /// Log verbosity (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream_url: default_upstream_url(),
            models_timeout_secs: default_models_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8585".to_string()
}

fn default_upstream_url() -> String {
    "http://localhost:8080/v1".to_string()
}

fn default_models_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarmonyError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| HarmonyError::Config(format!("Failed to parse config: {e}")))
    }

    /// Config file to read: the explicit path, else the first default
    /// location that exists
    pub fn find_path(config_path: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = config_path {
            return Some(path.to_path_buf());
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".harmony-proxy").join("config.toml")),
            dirs::config_dir().map(|c| c.join("harmony-proxy").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        default_paths.into_iter().flatten().find(|path| path.exists())
    }

    /// Load the config found by [`Config::find_path`], or fall back to defaults
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        match Self::find_path(config_path) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` to read variables
    ///
    /// Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = read(UPSTREAM_URL_ENV) {
            self.proxy.upstream_url = url;
        }
        if let Some(level) = read(LOG_LEVEL_ENV) {
            self.proxy.log_level = level.to_lowercase();
        }
        if let Some(addr) = read(LISTEN_ADDR_ENV) {
            self.proxy.listen_addr = addr;
        }
    }
}
