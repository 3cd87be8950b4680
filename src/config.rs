//! Configuration module for the Pulsewire SDK.
//!
//! This module provides environment-based configuration for the SDK,
//! covering the remote API host, the streaming endpoint and the timeouts
//! applied to HTTP requests and channel operations.

use std::env;
use std::time::Duration;

/// Default base URL of the Pulsewire REST API
pub const DEFAULT_API_URL: &str = "https://api.pulsewire.io";

/// Default URL of the streaming endpoint
pub const DEFAULT_STREAM_URL: &str = "wss://stream.pulsewire.io/ws";

/// Default HTTP request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Default timeout for the streaming handshake in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default timeout for a single outbound frame in seconds
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 5;

/// Upper bound for any configured timeout
const MAX_TIMEOUT_SECS: u64 = 300;

/// SDK version reported to the remote service.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration for the Pulsewire SDK.
///
/// All settings can be configured via environment variables:
/// - `PULSEWIRE_API_URL`: REST API base URL (default: https://api.pulsewire.io)
/// - `PULSEWIRE_STREAM_URL`: streaming endpoint (default: wss://stream.pulsewire.io/ws)
/// - `PULSEWIRE_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 15)
/// - `PULSEWIRE_CONNECT_TIMEOUT_SECS`: streaming handshake timeout (default: 10)
/// - `PULSEWIRE_SEND_TIMEOUT_SECS`: per-frame send timeout (default: 5)
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL for the REST API
    pub api_url: String,

    /// URL of the streaming endpoint, without query parameters
    pub stream_url: String,

    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// Maximum time to wait for the streaming handshake
    pub connect_timeout: Duration,

    /// Maximum time to wait for one frame to be written
    pub send_timeout: Duration,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to the production defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a URL variable is empty, or a timeout variable
    /// is not a number or lies outside `1..=300` seconds.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use pulsewire::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("API URL: {}", config.api_url);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = Self::parse_url("PULSEWIRE_API_URL", DEFAULT_API_URL)?;
        let stream_url = Self::parse_url("PULSEWIRE_STREAM_URL", DEFAULT_STREAM_URL)?;

        let request_timeout =
            Self::parse_timeout("PULSEWIRE_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        let connect_timeout =
            Self::parse_timeout("PULSEWIRE_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?;
        let send_timeout =
            Self::parse_timeout("PULSEWIRE_SEND_TIMEOUT_SECS", DEFAULT_SEND_TIMEOUT_SECS)?;

        Ok(Self {
            api_url,
            stream_url,
            request_timeout,
            connect_timeout,
            send_timeout,
        })
    }

    /// Point the REST client at a different host. Trailing slashes are dropped.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Point the streaming channel at a different endpoint.
    pub fn with_stream_url(mut self, stream_url: impl Into<String>) -> Self {
        self.stream_url = stream_url.into();
        self
    }

    /// Set the streaming handshake timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn parse_url(env_var: &str, default: &str) -> Result<String, ConfigError> {
        match env::var(env_var) {
            Ok(value) => {
                let value = value.trim().trim_end_matches('/');
                if value.is_empty() {
                    return Err(ConfigError {
                        message: "URL must not be empty".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }
                Ok(value.to_string())
            }
            Err(_) => Ok(default.to_string()),
        }
    }

    /// Parse a timeout in seconds from an environment variable with validation.
    fn parse_timeout(env_var: &str, default_secs: u64) -> Result<Duration, ConfigError> {
        match env::var(env_var) {
            Ok(value) => {
                let secs: u64 = value.trim().parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if secs == 0 {
                    return Err(ConfigError {
                        message: "timeout must be greater than 0".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if secs > MAX_TIMEOUT_SECS {
                    return Err(ConfigError {
                        message: format!(
                            "timeout {} exceeds maximum ({}s)",
                            secs, MAX_TIMEOUT_SECS
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(Duration::from_secs(secs))
            }
            Err(_) => Ok(Duration::from_secs(default_secs)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            stream_url: DEFAULT_STREAM_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            send_timeout: Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS),
        }
    }
}
