#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use locate_engine::audit::{AuditRecord, AuditSink, MemorySink};
use locate_engine::cache::{CacheBackend, MemoryCache};
use locate_engine::config::Settings;
use locate_engine::domain::{
    BorrowStatus, ClientConfig, ClientId, SourceTag, Stock, Ticker, TransactionFeeType,
};
use locate_engine::error::{AuditError, CacheError, EngineResult, FeedError};
use locate_engine::feeds::{
    EventFeed, EventOutlook, LenderFeed, LenderQuote, VolatilityFeed, VolatilityReading,
};
use locate_engine::service::{EngineParts, LocateEngine, LocateRequest};
use locate_engine::store::MemoryStore;

// ================================================================================================
// Stub feeds
// ================================================================================================

#[derive(Debug, Clone, Copy)]
pub enum LenderBehavior {
    Quote(Decimal, BorrowStatus),
    Unknown,
    Down,
}

pub struct StubLender {
    behavior: Mutex<LenderBehavior>,
    pub calls: AtomicU64,
}

impl StubLender {
    pub fn quoting(rate: Decimal, status: BorrowStatus) -> Self {
        Self {
            behavior: Mutex::new(LenderBehavior::Quote(rate, status)),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set(&self, behavior: LenderBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LenderFeed for StubLender {
    async fn borrow_rate(&self, ticker: &Ticker) -> Result<LenderQuote, FeedError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match *self.behavior.lock().unwrap() {
            LenderBehavior::Quote(rate, status) => Ok(LenderQuote {
                rate,
                status,
                as_of: Utc::now(),
                source: SourceTag::Live,
            }),
            LenderBehavior::Unknown => Err(FeedError::UnknownTicker(ticker.to_string())),
            LenderBehavior::Down => Err(FeedError::Transport {
                feed: "lender",
                msg: "connection refused".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum VolBehavior {
    Value(Decimal),
    Missing,
    Down,
}

pub struct StubVolatility {
    ticker: Mutex<VolBehavior>,
    market: Mutex<VolBehavior>,
    pub calls: AtomicU64,
}

impl StubVolatility {
    pub fn reading(ticker_vol: Decimal, market_vol: Decimal) -> Self {
        Self {
            ticker: Mutex::new(VolBehavior::Value(ticker_vol)),
            market: Mutex::new(VolBehavior::Value(market_vol)),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set_ticker(&self, behavior: VolBehavior) {
        *self.ticker.lock().unwrap() = behavior;
    }

    pub fn set_market(&self, behavior: VolBehavior) {
        *self.market.lock().unwrap() = behavior;
    }
}

fn vol_outcome(behavior: VolBehavior, missing_status: u16) -> Result<VolatilityReading, FeedError> {
    match behavior {
        VolBehavior::Value(value) => Ok(VolatilityReading {
            value,
            as_of: Utc::now(),
            source: SourceTag::Live,
        }),
        VolBehavior::Missing => Err(FeedError::Status {
            feed: "volatility",
            status: missing_status,
        }),
        VolBehavior::Down => Err(FeedError::Transport {
            feed: "volatility",
            msg: "connection refused".into(),
        }),
    }
}

#[async_trait]
impl VolatilityFeed for StubVolatility {
    async fn ticker_volatility(&self, _ticker: &Ticker) -> Result<VolatilityReading, FeedError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        vol_outcome(*self.ticker.lock().unwrap(), 404)
    }

    async fn market_volatility(&self) -> Result<VolatilityReading, FeedError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        vol_outcome(*self.market.lock().unwrap(), 404)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum EventBehavior {
    Risk(u8),
    NoEvents,
    Down,
}

pub struct StubEvents {
    behavior: Mutex<EventBehavior>,
    pub calls: AtomicU64,
}

impl StubEvents {
    pub fn with(behavior: EventBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set(&self, behavior: EventBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }
}

#[async_trait]
impl EventFeed for StubEvents {
    async fn event_outlook(&self, _ticker: &Ticker) -> Result<EventOutlook, FeedError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match *self.behavior.lock().unwrap() {
            EventBehavior::Risk(factor) => Ok(EventOutlook {
                risk_factor: factor,
                event_count: 1,
                source: SourceTag::Live,
            }),
            EventBehavior::NoEvents => Ok(EventOutlook {
                risk_factor: 0,
                event_count: 0,
                source: SourceTag::Live,
            }),
            EventBehavior::Down => Err(FeedError::Transport {
                feed: "events",
                msg: "connection refused".into(),
            }),
        }
    }
}

// ================================================================================================
// Misbehaving collaborators
// ================================================================================================

/// Cache backend with a dead connection; every operation errors.
pub struct BrokenCache;

#[async_trait]
impl CacheBackend for BrokenCache {
    async fn get(&self, _key: &str) -> EngineResult<Option<Bytes>> {
        Err(CacheError::Backend("connection refused".into()).into())
    }
    async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> EngineResult<()> {
        Err(CacheError::Backend("connection refused".into()).into())
    }
    async fn delete(&self, _key: &str) -> EngineResult<bool> {
        Err(CacheError::Backend("connection refused".into()).into())
    }
    async fn exists(&self, _key: &str) -> EngineResult<bool> {
        Err(CacheError::Backend("connection refused".into()).into())
    }
    async fn flush_prefix(&self, _prefix: &str) -> EngineResult<u64> {
        Err(CacheError::Backend("connection refused".into()).into())
    }
    async fn healthy(&self) -> bool {
        false
    }
}

/// Audit sink that rejects everything.
pub struct RejectingSink;

#[async_trait]
impl AuditSink for RejectingSink {
    async fn persist(&self, _record: AuditRecord) -> EngineResult<()> {
        Err(AuditError::Sink("disk full".into()).into())
    }
}

// ================================================================================================
// Harness
// ================================================================================================

pub struct TestHarness {
    pub engine: LocateEngine,
    pub store: Arc<MemoryStore>,
    pub lender: Arc<StubLender>,
    pub volatility: Arc<StubVolatility>,
    pub events: Arc<StubEvents>,
    pub sink: Arc<MemorySink>,
}

pub fn test_settings() -> Settings {
    Settings::default()
        .with_request_deadline(Duration::from_secs(2))
        .with_feed_timeout(Duration::from_millis(500))
}

/// Store seeded with the standard reference data used across the suites.
pub fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();

    store.insert_stock(stock("AAPL", BorrowStatus::Easy, Some(dec!(0.01))));
    store.insert_stock(stock("GME", BorrowStatus::Hard, Some(dec!(0.15))));
    store.insert_stock(stock("TSLA", BorrowStatus::Medium, Some(dec!(0.05))));
    store.insert_stock(stock("ZEROF", BorrowStatus::Easy, Some(Decimal::ZERO)));
    store.insert_stock(stock("NOMIN", BorrowStatus::Easy, None));

    store.insert_client(client(
        "standard",
        dec!(5.0),
        TransactionFeeType::Flat,
        dec!(25.00),
        true,
    ));
    store.insert_client(client(
        "premium",
        dec!(3.5),
        TransactionFeeType::Percentage,
        dec!(0.5),
        true,
    ));
    store.insert_client(client(
        "inactive_broker",
        dec!(5.0),
        TransactionFeeType::Flat,
        dec!(25.00),
        false,
    ));

    Arc::new(store)
}

pub fn stock(ticker: &str, status: BorrowStatus, min_borrow_rate: Option<Decimal>) -> Stock {
    Stock {
        ticker: Ticker::parse(ticker).unwrap(),
        borrow_status: status,
        lender_api_id: Some(format!("SEC-{ticker}")),
        min_borrow_rate,
        last_updated: Utc::now(),
    }
}

pub fn client(
    id: &str,
    markup_pct: Decimal,
    fee_type: TransactionFeeType,
    amount: Decimal,
    active: bool,
) -> ClientConfig {
    ClientConfig {
        client_id: ClientId::from(id),
        markup_percentage: markup_pct,
        transaction_fee_type: fee_type,
        transaction_amount: amount,
        active,
        last_updated: Utc::now(),
    }
}

/// Harness with live-looking defaults: lender quotes 5% EASY, ticker
/// volatility 15, market volatility 20, empty event calendar.
pub fn harness() -> TestHarness {
    harness_with(test_settings())
}

pub fn harness_with(settings: Settings) -> TestHarness {
    let store = seeded_store();
    let lender = Arc::new(StubLender::quoting(dec!(0.05), BorrowStatus::Easy));
    let volatility = Arc::new(StubVolatility::reading(dec!(15), dec!(20)));
    let events = Arc::new(StubEvents::with(EventBehavior::NoEvents));
    let sink = Arc::new(MemorySink::new());

    let engine = LocateEngine::assemble(EngineParts {
        settings,
        cache_backend: Arc::new(MemoryCache::new()),
        stocks: store.clone(),
        clients: store.clone(),
        lender: lender.clone(),
        volatility: volatility.clone(),
        events: events.clone(),
        sink: sink.clone(),
    });

    TestHarness {
        engine,
        store,
        lender,
        volatility,
        events,
        sink,
    }
}

pub fn locate_request(ticker: &str, position: Decimal, days: i64, client: &str) -> LocateRequest {
    LocateRequest {
        ticker: ticker.to_string(),
        position_value: position,
        loan_days: days,
        client_id: client.to_string(),
        request_id: None,
    }
}

/// Polls the memory sink until `expected` records arrived or we give up.
pub async fn wait_for_records(sink: &MemorySink, expected: usize) -> Vec<AuditRecord> {
    for _ in 0..200 {
        let records = sink.records();
        if records.len() >= expected {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    sink.records()
}
