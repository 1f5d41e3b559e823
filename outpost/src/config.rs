//! Process configuration, read from a single RON file.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use outpost_api::ApiConfig;
use outpost_common::{Limits, logging::LoggingConfig};
use outpost_delivery::DeliveryConfig;
use outpost_queue::QueueConfig;
use outpost_smtp::SubmissionConfig;
use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "OUTPOST_CONFIG";

/// Searched in order when neither `--config` nor [`CONFIG_ENV`] is given.
pub const DEFAULT_PATHS: &[&str] = &["./outpost.config.ron", "/etc/outpost/outpost.config.ron"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("`hostname` must be set")]
    MissingHostname,

    #[error("`api.auth_token` must be set while the API is enabled")]
    MissingAuthToken,

    #[error("`{field}` {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Retention of delivered and failed message states.
///
/// ```ron
/// status: (
///     retention_secs: 86400,
///     prune_interval_secs: 300,
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    /// How long terminal states stay queryable (default: 86400 = 24 hours)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Time between pruning passes (default: 300)
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

const fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

const fn default_prune_interval_secs() -> u64 {
    300
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

impl StatusConfig {
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    #[must_use]
    pub const fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Name this relay uses in SMTP greetings and, unless
    /// `delivery.helo_name` is set, in EHLO.
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub smtp: SubmissionConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

impl Config {
    /// # Errors
    ///
    /// If the file cannot be read or is not a valid configuration.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    /// # Errors
    ///
    /// If `content` is not a valid configuration.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(content)?)
    }

    /// Rejects configurations the relay cannot run with.
    ///
    /// # Errors
    ///
    /// The first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hostname.trim().is_empty() {
            return Err(ConfigError::MissingHostname);
        }

        if self.api.enabled && self.api.auth_token.is_empty() {
            return Err(ConfigError::MissingAuthToken);
        }

        let positive = [
            ("queue.capacity", self.queue.capacity == 0),
            ("delivery.workers", self.delivery.workers == 0),
            ("delivery.batch_size", self.delivery.batch_size == 0),
            ("delivery.poll_interval_ms", self.delivery.poll_interval_ms == 0),
            (
                "delivery.connection_timeout_secs",
                self.delivery.connection_timeout_secs == 0,
            ),
            ("delivery.dns.timeout_secs", self.delivery.dns.timeout_secs == 0),
            ("api.max_batch", self.api.max_batch == 0),
            ("limits.max_recipients", self.limits.max_recipients == 0),
            ("limits.max_message_size", self.limits.max_message_size == 0),
            ("status.prune_interval_secs", self.status.prune_interval_secs == 0),
        ];

        if let Some(&(field, _)) = positive.iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Invalid {
                field,
                reason: "must be greater than zero",
            });
        }

        Ok(())
    }

    /// The name announced when connecting to remote mail exchangers.
    #[must_use]
    pub fn helo_name(&self) -> &str {
        self.delivery
            .helo_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.hostname)
    }
}

/// Finds the configuration file using the following precedence:
/// 1. `explicit` (the `--config` flag)
/// 2. [`CONFIG_ENV`]
/// 3. [`DEFAULT_PATHS`], first that exists
///
/// # Errors
///
/// If an explicitly named file does not exist, or no default path does.
pub fn locate(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let defaults: Vec<PathBuf> = DEFAULT_PATHS.iter().map(PathBuf::from).collect();
    locate_in(explicit, std::env::var_os(CONFIG_ENV), &defaults)
}

fn locate_in(
    explicit: Option<PathBuf>,
    env: Option<OsString>,
    defaults: &[PathBuf],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("Config file does not exist: {}", path.display());
    }

    if let Some(env_path) = env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - --config flag\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}
