use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::{DnsError, MailExchanger, MxResolver};

#[derive(Debug, Clone)]
struct CachedResult {
    hosts: Arc<[MailExchanger]>,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Time-bounded cache in front of an [`MxResolver`].
///
/// Entries are keyed by lower-cased domain and replaced only once they have
/// expired. Failed resolutions are not cached. Two concurrent misses for the
/// same domain may both reach the resolver; the later result wins.
pub struct MxCache {
    resolver: Arc<dyn MxResolver>,
    ttl: Duration,
    entries: DashMap<String, CachedResult>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for MxCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MxCache")
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl MxCache {
    #[must_use]
    pub fn new(resolver: Arc<dyn MxResolver>, ttl: Duration) -> Self {
        Self {
            resolver,
            ttl,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Mail exchangers for `domain`, from the cache while the entry is fresh.
    ///
    /// # Errors
    ///
    /// Whatever the resolver returns on a miss.
    pub async fn resolve(&self, domain: &str) -> Result<Arc<[MailExchanger]>, DnsError> {
        let key = domain.to_ascii_lowercase();

        if let Some(cached) = self.entries.get(&key)
            && cached.expires_at > Instant::now()
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(&cached.hosts));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let hosts: Arc<[MailExchanger]> = self.resolver.resolve(&key).await?.into();

        self.entries.insert(
            key,
            CachedResult {
                hosts: Arc::clone(&hosts),
                expires_at: Instant::now() + self.ttl,
            },
        );
        debug!(domain, count = hosts.len(), ttl = ?self.ttl, "Cached mail exchangers");

        Ok(hosts)
    }

    /// Drops expired entries. Lookups never depend on this; it only bounds
    /// memory for domains that are not seen again.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, cached| cached.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
