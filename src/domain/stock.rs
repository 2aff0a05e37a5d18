use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use super::ticker::Ticker;

/// Borrowing difficulty tier reported by the lender source.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BorrowStatus {
    Easy,
    Medium,
    Hard,
}

/// Stock reference data, read from the relational store.
///
/// Created and mutated by an out-of-scope admin path; the engine only reads.
/// `min_borrow_rate` is the pricing floor applied after all adjustments and
/// the base-rate substitute when the lender source is unreachable. A row
/// without one is a data-integrity gap: the engine can still price while the
/// lender source is up, but has no fallback left once it goes down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub ticker: Ticker,
    pub borrow_status: BorrowStatus,
    pub lender_api_id: Option<String>,
    pub min_borrow_rate: Option<Decimal>,
    pub last_updated: DateTime<Utc>,
}
