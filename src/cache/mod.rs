//! Two-tier read-through / write-through cache proxy (C3).
//!
//! [`CacheProxy`] coordinates an in-process L1 tier ([`local::LocalCache`])
//! with a shared remote L2 tier ([`remote::RemoteCache`]) behind one small
//! interface. The read, write, and delete orderings below are load-bearing:
//! see the module-level comments on each method for why they run in the
//! order they do.

pub mod local;
pub mod remote;

use tracing::warn;

use crate::error::Result;
use local::LocalCache;
use remote::RemoteCache;

/// Outcome of a cache read.
pub enum Lookup {
    Hit(String),
    Miss,
}

/// The two-tier cache used by the URL service to accelerate short→long
/// resolution.
pub struct CacheProxy {
    l1: LocalCache,
    l2: RemoteCache,
}

impl CacheProxy {
    pub fn new(l1: LocalCache, l2: RemoteCache) -> Self {
        Self { l1, l2 }
    }

    /// L1 first; on miss, fall through to L2 and backfill L1 on a hit.
    /// L2 errors other than "missing" propagate unchanged so a caller can
    /// distinguish an overloaded cache from a cold one.
    pub async fn get(&self, key: &str) -> Result<Lookup> {
        if let Some(v) = self.l1.get(key) {
            return Ok(Lookup::Hit(v));
        }
        match self.l2.get(key).await {
            Ok(Some(v)) => {
                self.l1.set(key, &v);
                Ok(Lookup::Hit(v))
            }
            Ok(None) => Ok(Lookup::Miss),
            Err(e) => Err(e),
        }
    }

    /// Remote first, then local. Ordering matters only for the write path's
    /// failure mode: a crash between the two leaves L1 the sole cache,
    /// which self-heals via its own TTL; the reverse order would leave a
    /// stale L2 value visible fleet-wide until L2's (longer) TTL expires.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.l2.set(key, value).await?;
        self.l1.set(key, value);
        Ok(())
    }

    /// Same rationale as `set`: remote first, then local.
    pub async fn del(&self, key: &str) -> Result<()> {
        self.l2.del(key).await?;
        self.l1.del(key);
        Ok(())
    }

    /// Best-effort write used on the hot paths (Create/Retrieve backfill):
    /// log a failure instead of propagating it, since a missed cache
    /// population never corrupts state — the store remains authoritative.
    pub async fn set_best_effort(&self, key: &str, value: &str) {
        if let Err(e) = self.set(key, value).await {
            warn!(key, error = %e, "cache set failed, continuing without it");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use local::LocalCache;
    use remote::tests::InMemoryRemote;
    use std::time::Duration;

    fn proxy() -> CacheProxy {
        CacheProxy::new(
            LocalCache::new(1000, 10_000_000, Duration::from_secs(60)),
            RemoteCache::from_backend(InMemoryRemote::new()),
        )
    }

    #[tokio::test]
    async fn set_then_get_hits_l1() {
        let p = proxy();
        p.set("abc", "https://example.com").await.unwrap();
        match p.get("abc").await.unwrap() {
            Lookup::Hit(v) => assert_eq!(v, "https://example.com"),
            Lookup::Miss => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn miss_on_absent_key() {
        let p = proxy();
        assert!(matches!(p.get("nope").await.unwrap(), Lookup::Miss));
    }

    #[tokio::test]
    async fn del_clears_both_tiers() {
        let p = proxy();
        p.set("abc", "v").await.unwrap();
        p.del("abc").await.unwrap();
        assert!(matches!(p.get("abc").await.unwrap(), Lookup::Miss));
    }
}
