use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::impl_from_primitive;

/// Identifier of a brokerage client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub String);
impl_from_primitive!(ClientId, String);

impl ClientId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        ClientId(value.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a client's per-transaction fee is charged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionFeeType {
    /// Fixed dollar amount per locate.
    Flat,
    /// Percentage of the position value.
    Percentage,
}

/// Per-client pricing configuration, read from the relational store.
///
/// All numeric fields are non-negative. `markup_percentage` and a
/// PERCENTAGE `transaction_amount` are expressed as percents (5.0 = 5%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_id: ClientId,
    pub markup_percentage: Decimal,
    pub transaction_fee_type: TransactionFeeType,
    pub transaction_amount: Decimal,
    pub active: bool,
    pub last_updated: DateTime<Utc>,
}
