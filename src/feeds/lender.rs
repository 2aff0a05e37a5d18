use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{CircuitBreaker, FeedTransport};
use crate::config::Settings;
use crate::domain::{BorrowStatus, SourceTag, Ticker};
use crate::error::{ConfigError, EngineResult, FeedError};

/// A live borrow-rate quote from the securities-lending source.
#[derive(Debug, Clone, PartialEq)]
pub struct LenderQuote {
    pub rate: Decimal,
    pub status: BorrowStatus,
    pub as_of: DateTime<Utc>,
    pub source: SourceTag,
}

/// The real-time borrow-rate source.
#[async_trait]
pub trait LenderFeed: Send + Sync {
    /// Current annualized borrow rate for `ticker`.
    ///
    /// `FeedError::UnknownTicker` means the source answered authoritatively
    /// that it has never heard of the symbol; everything else is an outage.
    async fn borrow_rate(&self, ticker: &Ticker) -> Result<LenderQuote, FeedError>;
}

#[derive(Debug, Deserialize)]
struct LenderQuoteWire {
    #[allow(dead_code)]
    ticker: String,
    rate: Decimal,
    status: String,
    timestamp: DateTime<Utc>,
}

pub struct HttpLenderFeed {
    transport: FeedTransport,
}

impl HttpLenderFeed {
    pub fn new(settings: &Settings, breaker: Arc<CircuitBreaker>) -> EngineResult<Self> {
        let base_url = settings
            .lender
            .base_url
            .clone()
            .ok_or(ConfigError::Missing("LOCATE_LENDER_API_URL"))?;
        let transport = FeedTransport::new(
            "lender",
            base_url,
            settings.lender.api_key.clone(),
            settings,
            breaker,
        )?;
        Ok(Self { transport })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        self.transport.breaker()
    }
}

#[async_trait]
impl LenderFeed for HttpLenderFeed {
    async fn borrow_rate(&self, ticker: &Ticker) -> Result<LenderQuote, FeedError> {
        let path = format!("/api/borrows/{ticker}");
        let (wire, source) = self
            .transport
            .get_json::<LenderQuoteWire>(&path, &[])
            .await
            .map_err(|e| match e {
                FeedError::Status { status: 404, .. } => {
                    FeedError::UnknownTicker(ticker.to_string())
                }
                other => other,
            })?;

        let status = BorrowStatus::from_str(&wire.status).map_err(|_| FeedError::Decode {
            feed: "lender",
            msg: format!("unknown borrow status '{}'", wire.status),
        })?;

        Ok(LenderQuote {
            rate: wire.rate,
            status,
            as_of: wire.timestamp,
            source,
        })
    }
}
