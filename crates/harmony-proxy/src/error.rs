//! Error types for harmony-proxy

use thiserror::Error;

/// Main error type for harmony-proxy operations
#[derive(Error, Debug)]
pub enum HarmonyError {
    /// Configuration errors (config file, environment, CLI overrides)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Proxy/HTTP server errors
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// Upstream endpoint errors (invalid base URL, client construction)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Marker rule set errors
    #[error("Rewrite error: {0}")]
    Rewrite(String),
}

/// Result type alias for harmony-proxy operations
pub type Result<T> = std::result::Result<T, HarmonyError>;
