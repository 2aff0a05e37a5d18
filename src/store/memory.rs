use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{ClientStore, StockStore};
use crate::domain::{ClientConfig, ClientId, Stock, Ticker};
use crate::error::EngineResult;

/// In-process reference-data store for tests and local development.
#[derive(Default)]
pub struct MemoryStore {
    stocks: RwLock<HashMap<Ticker, Stock>>,
    clients: RwLock<HashMap<ClientId, ClientConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_stock(&self, stock: Stock) {
        self.stocks
            .write()
            .expect("store lock poisoned")
            .insert(stock.ticker.clone(), stock);
    }

    pub fn insert_client(&self, client: ClientConfig) {
        self.clients
            .write()
            .expect("store lock poisoned")
            .insert(client.client_id.clone(), client);
    }
}

#[async_trait]
impl StockStore for MemoryStore {
    async fn stock_by_ticker(&self, ticker: &Ticker) -> EngineResult<Option<Stock>> {
        Ok(self
            .stocks
            .read()
            .expect("store lock poisoned")
            .get(ticker)
            .cloned())
    }

    async fn healthy(&self) -> bool {
        true
    }
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn client_by_id(&self, client_id: &ClientId) -> EngineResult<Option<ClientConfig>> {
        Ok(self
            .clients
            .read()
            .expect("store lock poisoned")
            .get(client_id)
            .cloned())
    }

    async fn healthy(&self) -> bool {
        true
    }
}
