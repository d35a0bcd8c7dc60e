//! URL service orchestrator (C5): composes the allocator, codec, cache
//! proxy, and relational store into Create/Retrieve/Lookup/Delete flows.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheProxy, Lookup};
use crate::codec;
use crate::error::{Error, Result};
use crate::sequence::Allocator;
use crate::storage::Store;

/// A short↔long mapping as returned to callers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UrlRecord {
    pub short: String,
    pub long_url: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct UrlService {
    store: Arc<dyn Store>,
    cache: CacheProxy,
    allocator: Allocator,
    request_timeout: Duration,
}

impl UrlService {
    pub fn new(
        store: Arc<dyn Store>,
        cache: CacheProxy,
        allocator: Allocator,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            allocator,
            request_timeout,
        }
    }

    /// Create a short code for `long_url`. Idempotent: shortening the same
    /// URL twice returns the same short code both times.
    pub async fn create(&self, long_url: &str) -> Result<UrlRecord> {
        validate_url(long_url)?;

        let seq = self.allocator.next(self.request_timeout).await?;
        let record = match self.store.insert_url(seq, long_url).await {
            Ok(record) => record,
            Err(e) if e.is_conflict() => {
                // Someone else already shortened this URL; the freshly
                // allocated `seq` is discarded (an accepted, documented gap).
                self.store.find_by_long_url(long_url).await?
            }
            Err(e) => return Err(e),
        };

        let short = codec::encode(record.short);
        self.cache.set_best_effort(&short, &record.long_url).await;

        Ok(to_api_record(short, record))
    }

    /// Resolve a short code to its long URL, consulting the cache before
    /// the store.
    pub async fn retrieve(&self, short: &str) -> Result<String> {
        let seq = codec::decode(short)?;

        match self.cache.get(short).await {
            Ok(Lookup::Hit(long_url)) => return Ok(long_url),
            Ok(Lookup::Miss) => {}
            Err(e) => return Err(e),
        }

        let record = self.store.find_by_short(seq).await?;
        self.cache.set_best_effort(short, &record.long_url).await;
        Ok(record.long_url)
    }

    /// Look up the short code previously issued for `long_url`, if any.
    /// Does not consult the cache: the cache's key space is short codes.
    pub async fn lookup(&self, long_url: &str) -> Result<UrlRecord> {
        validate_url(long_url)?;
        let record = self.store.find_by_long_url(long_url).await?;
        let short = codec::encode(record.short);
        Ok(to_api_record(short, record))
    }

    /// Soft-delete the record behind `short` and invalidate its cache entry.
    /// Cache invalidation failure is fatal: declaring success while a
    /// stale node could still resolve the code would violate the contract.
    pub async fn delete(&self, short: &str) -> Result<()> {
        let seq = codec::decode(short)?;
        self.store.soft_delete_by_short(seq).await?;
        self.cache.del(short).await
    }

    /// Close the allocator, then the cache, in that order.
    pub async fn close(self) {
        self.allocator.close().await;
    }
}

fn validate_url(raw: &str) -> Result<()> {
    if raw.len() > 500 {
        return Err(Error::invalid_input("long_url exceeds 500 bytes"));
    }
    let parsed = url::Url::parse(raw).map_err(|e| Error::invalid_input(format!("invalid URL: {e}")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::invalid_input("long_url must be http or https"));
    }
    Ok(())
}

fn to_api_record(short: String, record: crate::storage::UrlRecord) -> UrlRecord {
    UrlRecord {
        short,
        long_url: record.long_url,
        created_at: record.created_at,
        deleted_at: record.deleted_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::local::LocalCache;
    use crate::cache::remote::{tests::InMemoryRemote, RemoteCache};
    use crate::storage::tests::make_memory_store;

    async fn make_service(name: &str) -> UrlService {
        let store = make_memory_store().await;
        let allocator = Allocator::new(store.clone(), name, 100, 1).await.unwrap();
        let cache = CacheProxy::new(
            LocalCache::new(1000, 10_000_000, Duration::from_secs(60)),
            RemoteCache::from_backend(InMemoryRemote::new()),
        );
        UrlService::new(store, cache, allocator, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn create_then_retrieve_round_trips() {
        let svc = make_service("svc1").await;
        let record = svc.create("https://example.com").await.unwrap();
        let long = svc.retrieve(&record.short).await.unwrap();
        assert_eq!(long, "https://example.com");
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let svc = make_service("svc2").await;
        let a = svc.create("https://example.com/page").await.unwrap();
        let b = svc.create("https://example.com/page").await.unwrap();
        assert_eq!(a.short, b.short);
    }

    #[tokio::test]
    async fn delete_then_retrieve_is_not_found() {
        let svc = make_service("svc3").await;
        let record = svc.create("https://example.com/x").await.unwrap();
        svc.delete(&record.short).await.unwrap();
        let err = svc.retrieve(&record.short).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn invalid_short_code_is_invalid_input() {
        let svc = make_service("svc4").await;
        let err = svc.retrieve("zzzzzzzzz").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn lookup_finds_existing_record_by_long_url() {
        let svc = make_service("svc5").await;
        let created = svc.create("https://example.com/y").await.unwrap();
        let found = svc.lookup("https://example.com/y").await.unwrap();
        assert_eq!(found.short, created.short);
    }
}
