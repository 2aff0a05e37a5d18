pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::{Cache, CacheCategory};
use crate::domain::{ClientConfig, ClientId, Stock, Ticker};
use crate::error::EngineResult;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Read-only access to stock reference data.
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn stock_by_ticker(&self, ticker: &Ticker) -> EngineResult<Option<Stock>>;
    async fn healthy(&self) -> bool;
}

/// Read-only access to client pricing configuration.
#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn client_by_id(&self, client_id: &ClientId) -> EngineResult<Option<ClientConfig>>;
    async fn healthy(&self) -> bool;
}

/// Read-through cache over a [`ClientStore`], keyed `broker_config:{id}`.
///
/// Invalidation on writes belongs to the admin path; this layer only ever
/// fills. Stocks are deliberately not wrapped the same way: the stock row
/// feeds the rate floor, and a stale floor is a pricing error rather than a
/// freshness nuisance.
pub struct CachingClientStore {
    inner: Arc<dyn ClientStore>,
    cache: Cache,
}

impl CachingClientStore {
    pub fn new(inner: Arc<dyn ClientStore>, cache: Cache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl ClientStore for CachingClientStore {
    async fn client_by_id(&self, client_id: &ClientId) -> EngineResult<Option<ClientConfig>> {
        if let Some(config) = self
            .cache
            .get_json::<ClientConfig>(CacheCategory::BrokerConfig, Some(client_id.as_str()))
            .await
        {
            return Ok(Some(config));
        }

        let fetched = self.inner.client_by_id(client_id).await?;
        if let Some(config) = &fetched {
            self.cache
                .put_json(CacheCategory::BrokerConfig, Some(client_id.as_str()), config)
                .await;
        }
        Ok(fetched)
    }

    async fn healthy(&self) -> bool {
        self.inner.healthy().await
    }
}
