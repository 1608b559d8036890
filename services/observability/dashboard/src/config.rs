//! Dashboard server configuration

use crate::error::{DashboardError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// HTTP/WebSocket bind address
    pub bind_address: String,

    pub port: u16,

    /// Maximum number of concurrent WebSocket connections
    pub max_connections: usize,

    /// Enable CORS for web browsers
    pub enable_cors: bool,

    /// Heartbeat interval in seconds, 0 disables heartbeats
    pub heartbeat_interval_secs: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 100,
            enable_cors: true,
            heartbeat_interval_secs: 30,
        }
    }
}

impl DashboardConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| DashboardError::Configuration {
                message: format!("Invalid bind address {}:{}: {}", self.bind_address, self.port, e),
            })
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}
