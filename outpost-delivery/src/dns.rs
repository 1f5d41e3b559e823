//! Mail exchanger resolution.
//!
//! [`MxResolver`] is the capability the delivery service depends on;
//! [`HickoryResolver`] implements it with MX lookups and the implicit MX
//! rule of RFC 5321 section 5.1.

use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::{TokioResolver, config::ResolverOpts, name_server::TokioConnectionProvider};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DnsError {
    /// NXDOMAIN.
    #[error("Domain does not exist: {0}")]
    DomainNotFound(String),

    #[error("DNS lookup failed: {0}")]
    LookupFailed(#[from] hickory_resolver::ResolveError),

    #[error("DNS query timed out for domain: {0}")]
    Timeout(String),

    /// The system resolver configuration could not be loaded.
    #[error("Unable to initialise resolver: {0}")]
    Resolver(String),
}

/// A host willing to accept mail for a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailExchanger {
    pub host: String,
    /// MX preference, lower is tried first. 0 for an implicit MX.
    pub preference: u16,
}

impl MailExchanger {
    #[must_use]
    pub fn new(host: impl Into<String>, preference: u16) -> Self {
        Self {
            host: host.into(),
            preference,
        }
    }
}

/// Resolves the ordered list of mail exchangers for a domain.
///
/// Callers try the hosts in the order returned.
#[async_trait]
pub trait MxResolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> Result<Vec<MailExchanger>, DnsError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    /// DNS query timeout in seconds (default: 5)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    5
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// System resolver backed by hickory.
pub struct HickoryResolver {
    resolver: TokioResolver,
    lookup_timeout: Duration,
}

impl std::fmt::Debug for HickoryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HickoryResolver").finish_non_exhaustive()
    }
}

impl HickoryResolver {
    /// Builds a resolver from the system configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new(config: &DnsConfig) -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);
        // hickory retries each query `attempts` times on its own
        let attempts = u32::try_from(opts.attempts)
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        let lookup_timeout = opts.timeout.saturating_mul(attempts);

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())
            .map_err(|e| DnsError::Resolver(e.to_string()))?
            .with_options(opts)
            .build();

        Ok(Self {
            resolver,
            lookup_timeout,
        })
    }
}

#[async_trait]
impl MxResolver for HickoryResolver {
    async fn resolve(&self, domain: &str) -> Result<Vec<MailExchanger>, DnsError> {
        debug!(domain, "Resolving mail exchangers");

        let lookup = tokio::time::timeout(self.lookup_timeout, self.resolver.mx_lookup(domain))
            .await
            .map_err(|_| DnsError::Timeout(domain.to_string()))?;

        match lookup {
            Ok(lookup) => {
                let mut hosts: Vec<MailExchanger> = lookup
                    .iter()
                    .map(|mx| {
                        let host = mx.exchange().to_utf8();
                        MailExchanger::new(host.trim_end_matches('.'), mx.preference())
                    })
                    .collect();
                hosts.sort_by_key(|mx| mx.preference);

                if hosts.is_empty() {
                    debug!(domain, "MX lookup was empty, using implicit MX");
                    return Ok(vec![MailExchanger::new(domain, 0)]);
                }

                debug!(domain, count = hosts.len(), "Resolved mail exchangers");
                Ok(hosts)
            }
            Err(err) if err.is_no_records_found() && !err.is_nx_domain() => {
                debug!(domain, "No MX records, using implicit MX");
                Ok(vec![MailExchanger::new(domain, 0)])
            }
            Err(err) if err.is_nx_domain() => Err(DnsError::DomainNotFound(domain.to_string())),
            Err(err) => {
                warn!(domain, error = %err, "MX lookup failed");
                Err(DnsError::LookupFailed(err))
            }
        }
    }
}
