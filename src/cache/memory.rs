use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use super::CacheBackend;
use crate::error::EngineResult;

struct Entry {
    value: Bytes,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Process-local cache backend.
///
/// Serves development runs without a Redis and every test that needs real
/// cache semantics. Expired entries are dropped lazily on read and swept on
/// write; lock scopes never contain an await point.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> EngineResult<Option<Bytes>> {
        {
            let entries = self.entries.read().expect("cache lock poisoned");
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Expired: upgrade to a write lock and drop it.
        let mut entries = self.entries.write().expect("cache lock poisoned");
        if entries.get(key).is_some_and(Entry::is_expired) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> EngineResult<()> {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.retain(|_, entry| !entry.is_expired());
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> EngineResult<bool> {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        Ok(entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> EngineResult<bool> {
        let entries = self.entries.read().expect("cache lock poisoned");
        Ok(entries.get(key).is_some_and(|entry| !entry.is_expired()))
    }

    async fn flush_prefix(&self, prefix: &str) -> EngineResult<u64> {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_their_ttl() {
        let cache = MemoryCache::new();
        cache
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.exists("k").await.unwrap());
        // The expired read also evicted the entry.
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn flush_prefix_only_touches_matching_keys() {
        let cache = MemoryCache::new();
        for key in ["locate:borrow_rate:AAPL", "locate:borrow_rate:GME"] {
            cache
                .set(key, Bytes::from_static(b"1"), Duration::from_secs(60))
                .await
                .unwrap();
        }
        cache
            .set(
                "locate:volatility:AAPL",
                Bytes::from_static(b"1"),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let flushed = cache.flush_prefix("locate:borrow_rate").await.unwrap();
        assert_eq!(flushed, 2);
        assert!(cache.exists("locate:volatility:AAPL").await.unwrap());
    }

    #[tokio::test]
    async fn delete_reports_whether_the_key_existed() {
        let cache = MemoryCache::new();
        cache
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
    }
}
