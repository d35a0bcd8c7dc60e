//! L2: the shared remote cache tier.
//!
//! [`RemoteCache`] wraps a [`RemoteBackend`] trait object so the rest of the
//! crate (and the remote rate limiter in [`crate::ratelimit::remote`], which
//! shares the same connection) can be tested against an in-memory double
//! without a running Redis. The production backend is a real `redis` crate
//! client, not a simulation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{Error, Result};

/// The operations the rest of the crate needs from the remote store: plain
/// GET/SET EX/DEL for caching, plus a single atomic script evaluation used
/// by the distributed token bucket.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
    async fn ping(&self) -> Result<()>;

    /// Evaluate the token-bucket admission script against `tokens_key` /
    /// `ts_key`. Returns whether `requested` tokens were admitted.
    async fn eval_token_bucket(
        &self,
        tokens_key: &str,
        ts_key: &str,
        rate: f64,
        capacity: f64,
        now_ms: i64,
        requested: f64,
        ttl_ms: i64,
    ) -> Result<bool>;
}

pub struct RemoteCache {
    backend: Arc<dyn RemoteBackend>,
    ttl: Duration,
}

impl RemoteCache {
    pub fn from_backend(backend: impl RemoteBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
            ttl: Duration::from_secs(24 * 3600),
        }
    }

    /// Override the nominal TTL applied by [`RemoteCache::set`].
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn backend(&self) -> Arc<dyn RemoteBackend> {
        self.backend.clone()
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.backend.get(key).await
    }

    /// Stores with up to 10% random jitter added to the nominal TTL, so a
    /// burst of entries created at the same moment do not expire in lockstep.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_with_ttl(key, value, self.ttl).await
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let jitter_frac: f64 = rand::thread_rng().gen_range(0.0..0.10);
        let jittered = ttl + Duration::from_secs_f64(ttl.as_secs_f64() * jitter_frac);
        self.backend.set_ex(key, value, jittered).await
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        self.backend.del(key).await
    }
}

/// Lua script implementing the token-bucket admission algorithm described
/// in the component design for the remote rate limiter: refill by elapsed
/// time, admit iff enough tokens are available, persist both keys with a
/// TTL long enough to survive an idle bucket.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local tokens_key = KEYS[1]
local ts_key = KEYS[2]
local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])
local ttl_ms = tonumber(ARGV[5])

local tokens = tonumber(redis.call("GET", tokens_key))
if tokens == nil then tokens = capacity end
local last = tonumber(redis.call("GET", ts_key))
if last == nil then last = 0 end

local elapsed = math.max(0, now_ms - last)
local filled = math.min(capacity, tokens + elapsed * rate / 1000.0)

local admitted = 0
if filled >= requested then
    filled = filled - requested
    admitted = 1
end

redis.call("SET", tokens_key, tostring(filled), "PX", ttl_ms)
redis.call("SET", ts_key, tostring(now_ms), "PX", ttl_ms)

return admitted
"#;

/// Real Redis-backed implementation of [`RemoteBackend`].
pub struct RedisBackend {
    manager: ConnectionManager,
    script: redis::Script,
}

impl RedisBackend {
    pub async fn connect(addr: &str) -> Result<Self> {
        let client = redis::Client::open(addr).map_err(Error::from)?;
        let manager = client.get_tokio_connection_manager().await.map_err(Error::from)?;
        Ok(Self {
            manager,
            script: redis::Script::new(TOKEN_BUCKET_SCRIPT),
        })
    }
}

#[async_trait]
impl RemoteBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await.map_err(Error::from)?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set_ex(key, value, ttl.as_secs().max(1) as usize)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await.map_err(Error::from)?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn eval_token_bucket(
        &self,
        tokens_key: &str,
        ts_key: &str,
        rate: f64,
        capacity: f64,
        now_ms: i64,
        requested: f64,
        ttl_ms: i64,
    ) -> Result<bool> {
        let mut conn = self.manager.clone();
        let admitted: i64 = self
            .script
            .key(tokens_key)
            .key(ts_key)
            .arg(rate)
            .arg(capacity)
            .arg(now_ms)
            .arg(requested)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(Error::from)?;
        Ok(admitted == 1)
    }
}

/// Gated on `feature = "test-util"` too (not just `cfg(test)`) so the
/// integration tests under `tests/` can reach [`InMemoryRemote`].
#[cfg(any(test, feature = "test-util"))]
pub mod tests {
    use super::*;
    use dashmap::DashMap;
    use parking_lot::Mutex;

    /// In-memory double implementing the same token-bucket semantics as the
    /// Lua script, so rate-limiter and cache-proxy tests do not need a
    /// running Redis.
    pub struct InMemoryRemote {
        values: DashMap<String, String>,
        buckets: Mutex<std::collections::HashMap<(String, String), (f64, i64)>>,
        alive: std::sync::atomic::AtomicBool,
    }

    impl InMemoryRemote {
        pub fn new() -> Self {
            Self {
                values: DashMap::new(),
                buckets: Mutex::new(std::collections::HashMap::new()),
                alive: std::sync::atomic::AtomicBool::new(true),
            }
        }

        pub fn set_alive(&self, alive: bool) {
            self.alive.store(alive, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RemoteBackend for InMemoryRemote {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            if !self.alive.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::unavailable("remote store down"));
            }
            Ok(self.values.get(key).map(|v| v.clone()))
        }

        async fn set_ex(&self, key: &str, value: &str, _ttl: Duration) -> Result<()> {
            if !self.alive.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::unavailable("remote store down"));
            }
            self.values.insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn del(&self, key: &str) -> Result<()> {
            if !self.alive.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::unavailable("remote store down"));
            }
            self.values.remove(key);
            Ok(())
        }

        async fn ping(&self) -> Result<()> {
            if self.alive.load(std::sync::atomic::Ordering::SeqCst) {
                Ok(())
            } else {
                Err(Error::unavailable("remote store down"))
            }
        }

        async fn eval_token_bucket(
            &self,
            tokens_key: &str,
            ts_key: &str,
            rate: f64,
            capacity: f64,
            now_ms: i64,
            requested: f64,
            _ttl_ms: i64,
        ) -> Result<bool> {
            if !self.alive.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::unavailable("remote store down"));
            }
            let mut buckets = self.buckets.lock();
            let key = (tokens_key.to_string(), ts_key.to_string());
            let (tokens, last) = buckets.entry(key.clone()).or_insert((capacity, 0));
            let elapsed = (now_ms - *last).max(0) as f64;
            let filled = (*tokens + elapsed * rate / 1000.0).min(capacity);
            let admitted = filled >= requested;
            let remaining = if admitted { filled - requested } else { filled };
            buckets.insert(key, (remaining, now_ms));
            Ok(admitted)
        }
    }

    #[tokio::test]
    async fn set_get_del_round_trip() {
        let cache = RemoteCache::from_backend(InMemoryRemote::new());
        cache.set("k", "v").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        cache.del("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
