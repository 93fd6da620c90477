//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_settings::ServerSettings;

/// Configuration for the HTTP server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `8787`; `0` picks a free port).
    pub port: u16,
    /// Interval between SSE keep-alive comments, in seconds.
    pub keep_alive_secs: u64,
    /// How long shutdown waits for open streams before giving up.
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Keep-alive interval, never below one second.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }

    /// Shutdown grace period.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8787,
            keep_alive_secs: 15,
            shutdown_timeout_secs: 30,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            keep_alive_secs: settings.keep_alive_secs,
            ..Self::default()
        }
    }
}
