use rust_decimal::Decimal;
use tracing::warn;

use crate::config::Settings;
use crate::domain::{Origin, Stock};
use crate::error::FeedError;

/// Centralized substitution rules for missing or failed inputs.
///
/// One table, consulted by the resolver, decides what replaces each input
/// and how the substitution is tagged in provenance:
///
/// | missing input              | substitute              | tag                |
/// |----------------------------|-------------------------|--------------------|
/// | lender source              | `stock.min_borrow_rate` | `base=fallback`    |
/// | ticker volatility          | market-wide index       | `vol=live_market`  |
/// | market-wide volatility     | `default_volatility`    | `vol=fallback`     |
/// | event source / no events   | 0                       | `event=fallback` / `event=absent` |
/// | cache                      | proceed uncached        | (no change)        |
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    default_volatility: Decimal,
    global_min_rate: Decimal,
}

impl FallbackPolicy {
    pub fn new(settings: &Settings) -> Self {
        Self {
            default_volatility: settings.default_volatility,
            global_min_rate: settings.global_min_rate,
        }
    }

    /// Substitute for an unreachable lender source.
    ///
    /// The stock's own floor stands in for the live rate. A row without a
    /// floor has nothing left to offer: that is the one fallback that can
    /// itself fail, and it surfaces as `EXTERNAL_API_UNAVAILABLE`.
    pub fn base_rate(&self, stock: &Stock) -> Result<(Decimal, Origin), FeedError> {
        match stock.min_borrow_rate {
            Some(floor) => {
                warn!(ticker = %stock.ticker, %floor, "lender source down, pricing off the stock floor");
                Ok((floor, Origin::Fallback))
            }
            None => Err(FeedError::FallbacksExhausted(stock.ticker.to_string())),
        }
    }

    /// Substitute when both volatility sources are unreachable.
    pub fn volatility(&self) -> (Decimal, Origin) {
        (self.default_volatility, Origin::Fallback)
    }

    /// Substitute for an unreachable event source.
    pub fn event_risk_unreachable(&self) -> (u8, Origin) {
        (0, Origin::Fallback)
    }

    /// Risk factor when the event source answers but lists nothing.
    pub fn event_risk_absent(&self) -> (u8, Origin) {
        (0, Origin::Absent)
    }

    /// The floor a resolved rate is clamped to: the stricter of the stock's
    /// own minimum and the global minimum.
    pub fn rate_floor(&self, stock: &Stock) -> Decimal {
        stock
            .min_borrow_rate
            .unwrap_or(self.global_min_rate)
            .max(self.global_min_rate)
    }
}
