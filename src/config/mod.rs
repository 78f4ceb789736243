//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin for CORS (comma-separated for multiple)
    pub client_origin: String,
    /// Reconnection grace period for mid-match disconnects (seconds)
    pub reconnect_grace_secs: u64,
    /// Per-stage timer (milliseconds)
    pub stage_duration_ms: f64,
    /// Artificial input delay for latency testing (milliseconds, 0 = off)
    pub simulate_latency_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            reconnect_grace_secs: env::var("MATCH_RECONNECT_GRACE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),

            stage_duration_ms: env::var("STAGE_DURATION_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(120_000.0),

            simulate_latency_ms: env::var("SIMULATE_LATENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,
}
