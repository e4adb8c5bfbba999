//! Configuration types for the HTTP surface

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request body in bytes
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl ServerConfig {
    /// Socket address from `host` and `port`.
    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| format!("invalid listen address {}:{}: {}", self.host, self.port, e))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("server.port must be greater than 0".to_string());
        }
        if self.max_body_bytes == 0 {
            return Err("server.max_body_bytes must be greater than 0".to_string());
        }
        self.socket_addr().map(|_| ())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
