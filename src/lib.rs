// === Public Modules (The Canonical Paths) ===
pub mod audit;
pub mod cache;
pub mod config;
pub mod deadline;
pub mod domain;
pub mod error;
pub mod fee;
pub mod feeds;
pub mod resolver;
pub mod rounding;
pub mod service;
pub mod store;

// === Private Implementation Details ===
mod fallback;
mod macros;

// === Facades (Re-exporting internals) ===
pub use crate::config::{ApiKey, Settings, Url};
pub use crate::domain::{ClientId, FeeBreakdown, ResolvedRate, Ticker};
pub use crate::error::{EngineError, EngineResult, ErrorCode};
pub use crate::service::{EngineParts, LocateEngine, LocateRequest};
