//! Locate fee calculation.
//!
//! Given a resolved rate, a client's pricing configuration, and the locate
//! parameters, produces the component breakdown. All arithmetic is exact
//! decimal; rounding happens once per component at the end and the total is
//! the sum of the rounded components.

use rust_decimal::Decimal;

use crate::domain::{ClientConfig, FeeBreakdown, ResolvedRate, TransactionFeeType};
use crate::error::{CalcError, EngineResult, ValidationError};
use crate::rounding::{annualize, round_money};

pub fn validate_position(position_value: Decimal) -> Result<Decimal, ValidationError> {
    if position_value <= Decimal::ZERO {
        return Err(ValidationError::NonPositivePosition(position_value));
    }
    Ok(position_value)
}

pub fn validate_loan_days(loan_days: i64) -> Result<u32, ValidationError> {
    if !(1..=i64::from(u32::MAX)).contains(&loan_days) {
        return Err(ValidationError::InvalidLoanDays(loan_days));
    }
    Ok(loan_days as u32)
}

/// Prices one locate.
///
/// Component order is fixed: borrow cost from the annualized rate, markup on
/// the borrow cost, then the transaction fee per the client's fee model.
pub fn calculate(
    resolved: &ResolvedRate,
    client: &ClientConfig,
    position_value: Decimal,
    loan_days: u32,
) -> EngineResult<FeeBreakdown> {
    let borrow_cost_exact = annualize(position_value * resolved.current_rate, loan_days);
    let markup_exact = borrow_cost_exact * client.markup_percentage / Decimal::ONE_HUNDRED;
    let transaction_fees_exact = match client.transaction_fee_type {
        TransactionFeeType::Flat => client.transaction_amount,
        TransactionFeeType::Percentage => {
            position_value * client.transaction_amount / Decimal::ONE_HUNDRED
        }
    };

    let borrow_cost = round_money(borrow_cost_exact);
    let markup = round_money(markup_exact);
    let transaction_fees = round_money(transaction_fees_exact);
    let total_fee = borrow_cost + markup + transaction_fees;

    let breakdown = FeeBreakdown {
        borrow_cost,
        markup,
        transaction_fees,
        total_fee,
        borrow_rate_used: resolved.current_rate,
    };

    if !breakdown.is_consistent() {
        return Err(CalcError::SumMismatch {
            components: breakdown.borrow_cost + breakdown.markup + breakdown.transaction_fees,
            reported: breakdown.total_fee,
        }
        .into());
    }
    Ok(breakdown)
}
