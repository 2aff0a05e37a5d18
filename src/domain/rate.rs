use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::stock::BorrowStatus;
use super::ticker::Ticker;

/// How a feed answer was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, Default)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceTag {
    /// First attempt succeeded.
    #[default]
    Live,
    /// Succeeded after at least one retry.
    Retry,
    /// The value was substituted by the fallback policy.
    Fallback,
}

/// Where one input of a resolved rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Origin {
    /// Fetched from the input's primary source.
    Live,
    /// Ticker-specific volatility was unavailable; the market-wide index
    /// answered instead.
    LiveMarket,
    /// Substituted by the fallback policy.
    Fallback,
    /// The source answered authoritatively that there is nothing (e.g. no
    /// upcoming events for the ticker).
    Absent,
}

/// Per-input provenance of a resolved rate, recorded in every audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub base: Origin,
    pub volatility: Origin,
    pub event: Origin,
}

impl Provenance {
    /// True when every input came from its primary source.
    pub fn fully_live(&self) -> bool {
        self.base == Origin::Live
            && self.volatility == Origin::Live
            && matches!(self.event, Origin::Live | Origin::Absent)
    }
}

/// Volatility regime bands used for rate bumps and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityTier {
    Low,
    Normal,
    High,
    Extreme,
}

impl VolatilityTier {
    /// Band boundaries: LOW < 20 <= NORMAL < 30 <= HIGH < 40 <= EXTREME.
    pub fn from_index(index: Decimal) -> Self {
        if index >= Decimal::from(40) {
            Self::Extreme
        } else if index >= Decimal::from(30) {
            Self::High
        } else if index >= Decimal::from(20) {
            Self::Normal
        } else {
            Self::Low
        }
    }
}

/// The fully assembled borrow rate for one ticker.
///
/// `current_rate` carries full precision; rounding happens only when the
/// value is rendered at the API boundary. Cached under `borrow_rate:{ticker}`
/// for TTL_RATE, so repeated lookups inside one window observe the identical
/// rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRate {
    pub ticker: Ticker,
    pub current_rate: Decimal,
    pub borrow_status: BorrowStatus,
    pub volatility_index: Option<Decimal>,
    pub event_risk_factor: Option<u8>,
    pub provenance: Provenance,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn tier_boundaries_match_the_bands() {
        assert_eq!(VolatilityTier::from_index(dec!(15)), VolatilityTier::Low);
        assert_eq!(
            VolatilityTier::from_index(dec!(19.9999)),
            VolatilityTier::Low
        );
        assert_eq!(VolatilityTier::from_index(dec!(20)), VolatilityTier::Normal);
        assert_eq!(
            VolatilityTier::from_index(dec!(29.9999)),
            VolatilityTier::Normal
        );
        assert_eq!(VolatilityTier::from_index(dec!(30)), VolatilityTier::High);
        assert_eq!(
            VolatilityTier::from_index(dec!(39.9999)),
            VolatilityTier::High
        );
        assert_eq!(
            VolatilityTier::from_index(dec!(40)),
            VolatilityTier::Extreme
        );
        assert_eq!(
            VolatilityTier::from_index(dec!(60)),
            VolatilityTier::Extreme
        );
    }

    #[test]
    fn provenance_live_check_treats_absent_events_as_live() {
        let provenance = Provenance {
            base: Origin::Live,
            volatility: Origin::Live,
            event: Origin::Absent,
        };
        assert!(provenance.fully_live());

        let degraded = Provenance {
            base: Origin::Fallback,
            ..provenance
        };
        assert!(!degraded.fully_live());
    }
}
