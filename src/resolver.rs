use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheCategory};
use crate::config::{RateTuning, Settings};
use crate::deadline::Deadline;
use crate::domain::{BorrowStatus, Origin, Provenance, ResolvedRate, Stock, Ticker};
use crate::error::{DataError, EngineError, EngineResult};
use crate::fallback::FallbackPolicy;
use crate::feeds::{EventFeed, LenderFeed, VolatilityFeed};
use crate::store::StockStore;

/// Assembles the effective borrow rate for a ticker.
///
/// The pipeline is fixed: base rate, then the volatility adjustment, then
/// the event-risk adjustment, then the floor clamp. Every external input is
/// fallback-eligible, so the resolver returns an error only for an unknown
/// ticker, an exhausted fallback, or a spent deadline on the repository
/// lookup itself.
pub struct RateResolver {
    stocks: Arc<dyn StockStore>,
    lender: Arc<dyn LenderFeed>,
    volatility: Arc<dyn VolatilityFeed>,
    events: Arc<dyn EventFeed>,
    cache: Cache,
    policy: FallbackPolicy,
    tuning: RateTuning,
    feed_timeout: Duration,
}

/// Cached event outlook. The event count travels with the factor so cache
/// hits keep the absent-vs-live distinction in provenance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CachedEvents {
    factor: u8,
    events: usize,
}

impl RateResolver {
    pub fn new(
        settings: &Settings,
        stocks: Arc<dyn StockStore>,
        lender: Arc<dyn LenderFeed>,
        volatility: Arc<dyn VolatilityFeed>,
        events: Arc<dyn EventFeed>,
        cache: Cache,
    ) -> Self {
        Self {
            stocks,
            lender,
            volatility,
            events,
            cache,
            policy: FallbackPolicy::new(settings),
            tuning: settings.tuning,
            feed_timeout: settings.feed_timeout,
        }
    }

    #[tracing::instrument(skip(self, deadline), fields(%ticker))]
    pub async fn resolve_rate(
        &self,
        ticker: &Ticker,
        deadline: Deadline,
    ) -> EngineResult<ResolvedRate> {
        let stock = self.load_stock(ticker, deadline).await?;

        if let Some(cached) = self
            .cache
            .get_json::<ResolvedRate>(CacheCategory::BorrowRate, Some(ticker.as_str()))
            .await
        {
            debug!("serving resolved rate from cache");
            return Ok(cached);
        }

        let (base_rate, borrow_status, base_origin) = self.base_rate(&stock, deadline).await?;
        let (vol_index, vol_origin) = self.volatility_index(ticker, deadline).await;
        let (risk_factor, event_origin) = self.event_risk(ticker, deadline).await;

        let vol_adjusted = base_rate * (Decimal::ONE + volatility_adjustment(&self.tuning, vol_index));
        let event_adjusted =
            vol_adjusted * (Decimal::ONE + event_risk_adjustment(&self.tuning, risk_factor));
        let current_rate = event_adjusted.max(self.policy.rate_floor(&stock));

        let resolved = ResolvedRate {
            ticker: ticker.clone(),
            current_rate,
            borrow_status,
            volatility_index: Some(vol_index),
            event_risk_factor: Some(risk_factor),
            provenance: Provenance {
                base: base_origin,
                volatility: vol_origin,
                event: event_origin,
            },
            computed_at: Utc::now(),
        };

        self.cache
            .put_json(CacheCategory::BorrowRate, Some(ticker.as_str()), &resolved)
            .await;
        Ok(resolved)
    }

    async fn load_stock(&self, ticker: &Ticker, deadline: Deadline) -> EngineResult<Stock> {
        // The repository is not fallback-eligible: without the stock row
        // there is no floor to price against.
        let lookup = timeout(deadline.remaining(), self.stocks.stock_by_ticker(ticker));
        match lookup.await {
            Ok(Ok(Some(stock))) => Ok(stock),
            Ok(Ok(None)) => Err(DataError::TickerNotFound(ticker.to_string()).into()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::DeadlineExceeded(deadline.budget())),
        }
    }

    async fn base_rate(
        &self,
        stock: &Stock,
        deadline: Deadline,
    ) -> EngineResult<(Decimal, BorrowStatus, Origin)> {
        let budget = deadline.clamp(self.feed_timeout);
        match timeout(budget, self.lender.borrow_rate(&stock.ticker)).await {
            Ok(Ok(quote)) => Ok((quote.rate, quote.status, Origin::Live)),
            Ok(Err(e)) => {
                warn!(error = %e, "lender feed failed, applying fallback");
                let (rate, origin) = self.policy.base_rate(stock)?;
                Ok((rate, stock.borrow_status, origin))
            }
            Err(_) => {
                warn!("lender feed exhausted its slice of the deadline, applying fallback");
                let (rate, origin) = self.policy.base_rate(stock)?;
                Ok((rate, stock.borrow_status, origin))
            }
        }
    }

    async fn volatility_index(&self, ticker: &Ticker, deadline: Deadline) -> (Decimal, Origin) {
        if let Some(cached) = self
            .cache
            .get_json::<Decimal>(CacheCategory::Volatility, Some(ticker.as_str()))
            .await
        {
            return (cached, Origin::Live);
        }

        let budget = deadline.clamp(self.feed_timeout);
        match timeout(budget, self.volatility.ticker_volatility(ticker)).await {
            Ok(Ok(reading)) => {
                self.cache
                    .put_json(CacheCategory::Volatility, Some(ticker.as_str()), &reading.value)
                    .await;
                (reading.value, Origin::Live)
            }
            outcome => {
                if let Ok(Err(e)) = outcome {
                    debug!(error = %e, "no ticker volatility, trying the market-wide index");
                }
                self.market_volatility(deadline).await
            }
        }
    }

    async fn market_volatility(&self, deadline: Deadline) -> (Decimal, Origin) {
        if let Some(cached) = self
            .cache
            .get_json::<Decimal>(CacheCategory::MarketVolatility, None)
            .await
        {
            return (cached, Origin::LiveMarket);
        }

        let budget = deadline.clamp(self.feed_timeout);
        match timeout(budget, self.volatility.market_volatility()).await {
            Ok(Ok(reading)) => {
                self.cache
                    .put_json(CacheCategory::MarketVolatility, None, &reading.value)
                    .await;
                (reading.value, Origin::LiveMarket)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "volatility sources down, applying default volatility");
                self.policy.volatility()
            }
            Err(_) => {
                warn!("volatility feed exhausted its slice of the deadline, applying default");
                self.policy.volatility()
            }
        }
    }

    async fn event_risk(&self, ticker: &Ticker, deadline: Deadline) -> (u8, Origin) {
        if let Some(cached) = self
            .cache
            .get_json::<CachedEvents>(CacheCategory::EventRisk, Some(ticker.as_str()))
            .await
        {
            return if cached.events == 0 {
                self.policy.event_risk_absent()
            } else {
                (cached.factor, Origin::Live)
            };
        }

        let budget = deadline.clamp(self.feed_timeout);
        match timeout(budget, self.events.event_outlook(ticker)).await {
            Ok(Ok(outlook)) => {
                self.cache
                    .put_json(
                        CacheCategory::EventRisk,
                        Some(ticker.as_str()),
                        &CachedEvents {
                            factor: outlook.risk_factor,
                            events: outlook.event_count,
                        },
                    )
                    .await;
                if outlook.event_count == 0 {
                    self.policy.event_risk_absent()
                } else {
                    (outlook.risk_factor.min(10), Origin::Live)
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "event feed failed, assuming no event risk");
                self.policy.event_risk_unreachable()
            }
            Err(_) => {
                warn!("event feed exhausted its slice of the deadline, assuming no event risk");
                self.policy.event_risk_unreachable()
            }
        }
    }
}

/// Volatility adjustment: linear in the index, with absolute bumps once the
/// index crosses the high and extreme thresholds.
pub(crate) fn volatility_adjustment(tuning: &RateTuning, vol_index: Decimal) -> Decimal {
    let mut adjustment = vol_index * tuning.vol_factor;
    if vol_index > tuning.high_vol_threshold {
        adjustment += tuning.high_vol_bump;
    }
    if vol_index > tuning.extreme_vol_threshold {
        adjustment += tuning.extreme_vol_bump;
    }
    adjustment
}

/// Event-risk adjustment: `(risk / 10) * event_factor`.
pub(crate) fn event_risk_adjustment(tuning: &RateTuning, risk_factor: u8) -> Decimal {
    Decimal::from(risk_factor.min(10)) / Decimal::TEN * tuning.event_factor
}
