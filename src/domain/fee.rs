use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The priced locate, component by component.
///
/// Components are rounded half-even to cents and `total_fee` is their exact
/// sum, so `borrow_cost + markup + transaction_fees == total_fee` holds to
/// the last decimal place. `borrow_rate_used` keeps the resolver's full
/// precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub borrow_cost: Decimal,
    pub markup: Decimal,
    pub transaction_fees: Decimal,
    pub total_fee: Decimal,
    pub borrow_rate_used: Decimal,
}

impl FeeBreakdown {
    /// Verifies the sum invariant.
    pub fn is_consistent(&self) -> bool {
        self.borrow_cost + self.markup + self.transaction_fees == self.total_fee
    }
}
