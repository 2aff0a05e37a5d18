pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use strum::Display;
use tokio::time::Instant;
use tracing::warn;

use crate::config::{Settings, TtlPolicy};
use crate::error::EngineResult;

pub use memory::MemoryCache;
pub use redis::RedisCache;

/// Key namespaces, each with its own time-to-live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CacheCategory {
    BorrowRate,
    Volatility,
    MarketVolatility,
    EventRisk,
    BrokerConfig,
    Calculation,
}

impl CacheCategory {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::BorrowRate => "borrow_rate",
            Self::Volatility => "volatility",
            Self::MarketVolatility => "market_volatility",
            Self::EventRisk => "event_risk",
            Self::BrokerConfig => "broker_config",
            Self::Calculation => "calculation",
        }
    }

    pub fn ttl(&self, policy: &TtlPolicy) -> Duration {
        match self {
            Self::BorrowRate => policy.borrow_rate,
            Self::Volatility => policy.volatility,
            Self::MarketVolatility => policy.market_volatility,
            Self::EventRisk => policy.event_risk,
            Self::BrokerConfig => policy.broker_config,
            Self::Calculation => policy.calculation,
        }
    }
}

/// Raw byte-oriented cache operations; callers own (de)serialization.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> EngineResult<Option<Bytes>>;
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> EngineResult<()>;
    async fn delete(&self, key: &str) -> EngineResult<bool>;
    async fn exists(&self, key: &str) -> EngineResult<bool>;
    /// Removes every key starting with `prefix`; returns how many went.
    async fn flush_prefix(&self, prefix: &str) -> EngineResult<u64>;
    async fn healthy(&self) -> bool;
}

/// Operation counters, exported for scraping by the metrics collaborator.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    sets: AtomicU64,
    get_micros_total: AtomicU64,
    get_micros_max: AtomicU64,
}

impl CacheStats {
    fn record_get(&self, elapsed: Duration) {
        let micros = elapsed.as_micros() as u64;
        self.get_micros_total.fetch_add(micros, Ordering::Relaxed);
        self.get_micros_max.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            get_micros_total: self.get_micros_total.load(Ordering::Relaxed),
            get_micros_max: self.get_micros_max.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub sets: u64,
    pub get_micros_total: u64,
    pub get_micros_max: u64,
}

/// Namespaced, typed, failure-absorbing view over a [`CacheBackend`].
///
/// Backend failures degrade to misses and no-ops: a dead cache slows the
/// pipeline down, it never stops it. Failures are logged and counted.
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    namespace: String,
    ttl: TtlPolicy,
    stats: Arc<CacheStats>,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>, settings: &Settings) -> Self {
        Self {
            backend,
            namespace: settings.cache_namespace.clone(),
            ttl: settings.ttl,
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Builds the full key: `{namespace}:{prefix}` or
    /// `{namespace}:{prefix}:{suffix}` (`market_volatility` has no suffix).
    fn key(&self, category: CacheCategory, suffix: Option<&str>) -> String {
        match suffix {
            Some(suffix) => format!("{}:{}:{}", self.namespace, category.prefix(), suffix),
            None => format!("{}:{}", self.namespace, category.prefix()),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        category: CacheCategory,
        suffix: Option<&str>,
    ) -> Option<T> {
        let key = self.key(category, suffix);
        let started = Instant::now();
        let fetched = self.backend.get(&key).await;
        self.stats.record_get(started.elapsed());

        let payload = match fetched {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(%key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&payload) {
            Ok(value) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Err(e) => {
                // A payload we cannot decode is as good as absent.
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(%key, error = %e, "cache payload undecodable, treating as miss");
                None
            }
        }
    }

    pub async fn put_json<T: Serialize>(
        &self,
        category: CacheCategory,
        suffix: Option<&str>,
        value: &T,
    ) {
        let key = self.key(category, suffix);
        let payload = match serde_json::to_vec(value) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(%key, error = %e, "cache payload unserializable, skipping write");
                return;
            }
        };

        let ttl = category.ttl(&self.ttl);
        match self.backend.set(&key, payload, ttl).await {
            Ok(()) => {
                self.stats.sets.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(%key, error = %e, "cache write failed, continuing without");
            }
        }
    }

    pub async fn delete(&self, category: CacheCategory, suffix: Option<&str>) -> bool {
        let key = self.key(category, suffix);
        match self.backend.delete(&key).await {
            Ok(deleted) => deleted,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(%key, error = %e, "cache delete failed");
                false
            }
        }
    }

    pub async fn exists(&self, category: CacheCategory, suffix: Option<&str>) -> bool {
        let key = self.key(category, suffix);
        match self.backend.exists(&key).await {
            Ok(exists) => exists,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(%key, error = %e, "cache exists failed");
                false
            }
        }
    }

    /// Drops every key in one category.
    pub async fn flush_category(&self, category: CacheCategory) -> u64 {
        let prefix = format!("{}:{}", self.namespace, category.prefix());
        match self.backend.flush_prefix(&prefix).await {
            Ok(flushed) => flushed,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(%prefix, error = %e, "cache flush failed");
                0
            }
        }
    }

    pub async fn healthy(&self) -> bool {
        self.backend.healthy().await
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}
