use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{CircuitBreaker, FeedTransport};
use crate::config::Settings;
use crate::domain::{SourceTag, Ticker};
use crate::error::{ConfigError, EngineResult, FeedError};

/// One volatility observation, ticker-specific or market-wide.
#[derive(Debug, Clone, PartialEq)]
pub struct VolatilityReading {
    pub value: Decimal,
    pub as_of: DateTime<Utc>,
    pub source: SourceTag,
}

/// The market-data volatility source.
///
/// Exposes both granularities; the resolver tries the ticker first and drops
/// to the market-wide index when the ticker is not covered.
#[async_trait]
pub trait VolatilityFeed: Send + Sync {
    async fn ticker_volatility(&self, ticker: &Ticker) -> Result<VolatilityReading, FeedError>;
    async fn market_volatility(&self) -> Result<VolatilityReading, FeedError>;
}

#[derive(Debug, Deserialize)]
struct TickerVolatilityWire {
    #[allow(dead_code)]
    ticker: String,
    volatility: Decimal,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct MarketVolatilityWire {
    value: Decimal,
    timestamp: DateTime<Utc>,
}

pub struct HttpVolatilityFeed {
    transport: FeedTransport,
}

impl HttpVolatilityFeed {
    pub fn new(settings: &Settings, breaker: Arc<CircuitBreaker>) -> EngineResult<Self> {
        let base_url = settings
            .volatility
            .base_url
            .clone()
            .ok_or(ConfigError::Missing("LOCATE_VOLATILITY_API_URL"))?;
        let transport = FeedTransport::new(
            "volatility",
            base_url,
            settings.volatility.api_key.clone(),
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
impl VolatilityFeed for HttpVolatilityFeed {
    async fn ticker_volatility(&self, ticker: &Ticker) -> Result<VolatilityReading, FeedError> {
        let path = format!("/api/market/volatility/{ticker}");
        let (wire, source) = self
            .transport
            .get_json::<TickerVolatilityWire>(&path, &[])
            .await?;
        Ok(VolatilityReading {
            value: wire.volatility,
            as_of: wire.timestamp,
            source,
        })
    }

    async fn market_volatility(&self) -> Result<VolatilityReading, FeedError> {
        let (wire, source) = self
            .transport
            .get_json::<MarketVolatilityWire>("/api/market/volatility", &[])
            .await?;
        Ok(VolatilityReading {
            value: wire.value,
            as_of: wire.timestamp,
            source,
        })
    }
}
