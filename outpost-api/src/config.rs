//! HTTP API configuration

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the HTTP API
///
/// ```ron
/// api: (
///     listen_address: "127.0.0.1:8080",
///     auth_token: "change-me",
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// When disabled, the API server will not start.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Address to bind the API server (default: `127.0.0.1:8080`)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Bearer token required by every route except `/health`
    #[serde(default)]
    pub auth_token: String,

    /// Largest accepted `/send/batch` request (default: 100)
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    /// Upper bound on handling one request (default: 30)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Largest accepted request body in bytes (default: 64 MiB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

const fn default_enabled() -> bool {
    true
}

fn default_listen_address() -> String {
    "127.0.0.1:8080".to_string()
}

const fn default_max_batch() -> usize {
    100
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_max_body_size() -> usize {
    64 * 1024 * 1024
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            listen_address: default_listen_address(),
            auth_token: String::new(),
            max_batch: default_max_batch(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_size: default_max_body_size(),
        }
    }
}

impl ApiConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
