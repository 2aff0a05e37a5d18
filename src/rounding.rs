//! Output rounding for the pricing pipeline.
//!
//! Every intermediate value keeps `rust_decimal`'s full precision; rounding
//! happens exactly once, at the API boundary. Dollar amounts round half-even
//! to cents, rates to 4 decimal places. Totals are computed from the rounded
//! components, which preserves the breakdown sum invariant bit-exactly.

use rust_decimal::{Decimal, RoundingStrategy};

/// Fixed day-count convention for annualized borrow costs.
pub const DAYS_PER_YEAR: u32 = 365;

/// Rounds a dollar amount to cents, banker's rounding.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// Rounds an annualized rate to 4 decimal places, banker's rounding.
pub fn round_rate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(4, RoundingStrategy::MidpointNearestEven)
}

/// Fraction of a year covered by a loan of `loan_days`.
///
/// Kept as an exact ratio; callers multiply before dividing so the division
/// happens once, on the largest product.
pub fn annualize(notional_rate_product: Decimal, loan_days: u32) -> Decimal {
    notional_rate_product * Decimal::from(loan_days) / Decimal::from(DAYS_PER_YEAR)
}
