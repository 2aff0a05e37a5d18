pub mod client;
pub mod fee;
pub mod rate;
pub mod stock;
pub mod ticker;

pub use client::{ClientConfig, ClientId, TransactionFeeType};
pub use fee::FeeBreakdown;
pub use rate::{Origin, Provenance, ResolvedRate, SourceTag, VolatilityTier};
pub use stock::{BorrowStatus, Stock};
pub use ticker::Ticker;
