//! L1: a bounded, TTL-enforcing in-process cache.
//!
//! Backed by `moka::sync::Cache`, which already provides TTL enforcement and
//! silent eviction; this wrapper adds the second half of the L1 contract —
//! a byte-weighed capacity cap alongside the entry-count cap — and narrows
//! the API to the `get`/`set`/`del` shape the proxy needs.

use std::time::Duration;

use moka::sync::Cache;

pub struct LocalCache {
    inner: Cache<String, String>,
}

impl LocalCache {
    /// Enforces both halves of the L1 contract at once: `capacity` bounds
    /// the entry count and `max_memory_bytes` bounds the summed key+value
    /// byte size. moka only exposes a single weighted capacity, so the
    /// weigher reports each entry's weight as its real byte size floored at
    /// `max_memory_bytes / capacity` — that floor is what makes the entry
    /// count cap hold even for a flood of tiny values, while the real size
    /// still dominates for large ones, keeping the byte budget honest.
    pub fn new(capacity: u64, max_memory_bytes: u64, ttl: Duration) -> Self {
        let min_weight_per_entry = (max_memory_bytes / capacity.max(1)).max(1);
        let inner = Cache::builder()
            .max_capacity(max_memory_bytes)
            .weigher(move |k: &String, v: &String| {
                let real_size = (k.len() + v.len()) as u64;
                real_size.max(min_weight_per_entry).min(u32::MAX as u64) as u32
            })
            .time_to_live(ttl)
            .build();
        Self { inner }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    pub fn set(&self, key: &str, value: &str) {
        self.inner.insert(key.to_string(), value.to_string());
    }

    pub fn del(&self, key: &str) {
        self.inner.invalidate(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_retrieves() {
        let c = LocalCache::new(10, 1_000_000, Duration::from_secs(60));
        c.set("k", "v");
        assert_eq!(c.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn expired_entries_are_gone_after_ttl() {
        let c = LocalCache::new(10, 1_000_000, Duration::from_millis(10));
        c.set("k", "v");
        std::thread::sleep(Duration::from_millis(50));
        c.inner.run_pending_tasks();
        assert_eq!(c.get("k"), None);
    }

    #[test]
    fn del_removes_entry() {
        let c = LocalCache::new(10, 1_000_000, Duration::from_secs(60));
        c.set("k", "v");
        c.del("k");
        assert_eq!(c.get("k"), None);
    }

    #[test]
    fn entry_count_cap_holds_for_many_tiny_values() {
        let c = LocalCache::new(5, 1_000_000, Duration::from_secs(60));
        for i in 0..50 {
            c.set(&format!("k{i}"), "v");
        }
        c.inner.run_pending_tasks();
        assert!(c.inner.entry_count() <= 5);
    }

    #[test]
    fn memory_cap_holds_for_few_large_values() {
        let c = LocalCache::new(1000, 100, Duration::from_secs(60));
        for i in 0..20 {
            c.set(&format!("k{i}"), &"x".repeat(50));
        }
        c.inner.run_pending_tasks();
        assert!(c.inner.weighted_size() <= 100);
    }
}
