use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use super::CacheBackend;
use crate::error::{CacheError, EngineResult};

/// Redis-backed cache.
///
/// Holds a [`ConnectionManager`], which multiplexes one connection across
/// concurrent requests and reconnects on its own after failures; clones are
/// cheap handles onto the same connection.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    #[tracing::instrument(skip(url), err)]
    pub async fn connect(url: &str) -> EngineResult<Self> {
        let client = redis::Client::open(url).map_err(to_cache_error)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(to_cache_error)?;
        info!("redis cache connected");
        Ok(Self { conn })
    }
}

fn to_cache_error(e: redis::RedisError) -> CacheError {
    CacheError::Backend(e.to_string())
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> EngineResult<Option<Bytes>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(to_cache_error)?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> EngineResult<()> {
        let mut conn = self.conn.clone();
        // EX 0 is an error on the server side.
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value.as_ref(), seconds)
            .await
            .map_err(to_cache_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> EngineResult<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(key).await.map_err(to_cache_error)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> EngineResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await.map_err(to_cache_error)?;
        Ok(exists)
    }

    async fn flush_prefix(&self, prefix: &str) -> EngineResult<u64> {
        let pattern = format!("{prefix}*");
        let keys: Vec<String> = {
            let mut scan_conn = self.conn.clone();
            let mut iter = scan_conn
                .scan_match::<_, String>(&pattern)
                .await
                .map_err(to_cache_error)?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(&keys).await.map_err(to_cache_error)?;
        Ok(removed)
    }

    async fn healthy(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}
