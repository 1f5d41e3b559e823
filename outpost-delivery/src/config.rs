use std::time::Duration;

use serde::Deserialize;

use crate::DnsConfig;

/// Delivery configuration.
///
/// ```ron
/// delivery: (
///     workers: 20,
///     batch_size: 10,
///     poll_interval_ms: 1000,
///     connection_timeout_secs: 30,
///     dns_cache_ttl_secs: 300,
///     max_retries: 5,
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers (default: 20)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Messages taken from the queue per poll (default: 10)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Time between polls of an idle worker (default: 1000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound for one attempt against one mail exchanger (default: 30)
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// How long resolved mail exchangers are reused (default: 300)
    #[serde(default = "default_dns_cache_ttl_secs")]
    pub dns_cache_ttl_secs: u64,

    /// Failed attempts after which a message fails permanently (default: 5)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Name announced in EHLO; the relay hostname when unset
    #[serde(default)]
    pub helo_name: Option<String>,

    /// Port used to reach mail exchangers (default: 25)
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// Skip certificate verification after STARTTLS (default: false)
    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default)]
    pub dns: DnsConfig,
}

const fn default_workers() -> usize {
    20
}

const fn default_batch_size() -> usize {
    10
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_connection_timeout_secs() -> u64 {
    30
}

const fn default_dns_cache_ttl_secs() -> u64 {
    300
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_smtp_port() -> u16 {
    25
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            connection_timeout_secs: default_connection_timeout_secs(),
            dns_cache_ttl_secs: default_dns_cache_ttl_secs(),
            max_retries: default_max_retries(),
            helo_name: None,
            smtp_port: default_smtp_port(),
            accept_invalid_certs: false,
            dns: DnsConfig::default(),
        }
    }
}

impl DeliveryConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    #[must_use]
    pub const fn dns_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.dns_cache_ttl_secs)
    }
}
