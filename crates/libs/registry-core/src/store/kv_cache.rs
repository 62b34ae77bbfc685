//! The `KVCache` port: ephemeral key-value storage with per-entry TTLs,
//! used for sessions, the token burst cache, rate-limit counters, and the
//! metadata cache.
//!
//! Every entry's lifetime is decided at write time, not by a cache-wide
//! policy — a session may live for hours while a token lookup expires in
//! five seconds — so the local adapter uses `moka`'s per-entry [`Expiry`]
//! hook rather than a single `time_to_live`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;

use crate::error::Result;

/// Ephemeral key-value storage.
#[async_trait]
pub trait KVCache: Send + Sync {
    /// Returns the stored value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` at `key`. `ttl=None` means no expiry.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Removes `key`, if present.
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Option<Duration>,
}

struct PerEntryExpiry;

impl Expiry<String, Entry> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// The default/local adapter: an in-process moka cache. Caps are generous
/// since entries self-expire; this is a single-process cache, not a
/// distributed one; every consumer of this port must tolerate the cache
/// being empty or unavailable.
#[derive(Clone)]
pub struct MokaKvCache {
    inner: Cache<String, Entry>,
}

impl MokaKvCache {
    pub fn new() -> Self {
        let inner = Cache::builder()
            .max_capacity(100_000)
            .expire_after(PerEntryExpiry)
            .build();
        Self { inner }
    }
}

impl Default for MokaKvCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KVCache for MokaKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.get(key).await.map(|e| e.value))
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.inner
            .insert(key.to_string(), Entry { value, ttl })
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.invalidate(key).await;
        Ok(())
    }
}

/// A no-op adapter for the "absent KV" boundary case: every `get` misses,
/// every `put`/`delete` succeeds without storing anything. Selected when
/// `CACHE_DRIVER` names no concrete driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullKvCache;

#[async_trait]
impl KVCache for NullKvCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn put(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Convenience alias for the trait-object form most of the server holds.
pub type SharedKvCache = Arc<dyn KVCache>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let cache = MokaKvCache::new();
        cache.put("k", "v".to_string(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn short_ttl_expires() {
        let cache = MokaKvCache::new();
        cache
            .put("k", "v".to_string(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        cache.inner.run_pending_tasks().await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = MokaKvCache::new();
        cache.put("k", "v".to_string(), None).await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn null_cache_always_misses() {
        let cache = NullKvCache;
        cache.put("k", "v".to_string(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
