use std::time::Duration;

use rust_decimal::Decimal;
use strum_macros::{Display, IntoStaticStr};
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Calc(#[from] CalcError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

/// Errors raised while validating caller-supplied parameters.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("ticker '{0}' is malformed: expected 1-5 uppercase letters")]
    MalformedTicker(String),

    #[error("position_value must be positive, got {0}")]
    NonPositivePosition(Decimal),

    #[error("loan_days must be at least 1, got {0}")]
    InvalidLoanDays(i64),

    #[error("client_id must not be empty")]
    EmptyClientId,
}

/// Errors related to stock and client reference data.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("ticker '{0}' not found")]
    TickerNotFound(String),

    #[error("client '{0}' not found")]
    ClientNotFound(String),

    #[error("store query failed: {0}")]
    Store(String),
}

/// Errors raised by the external data feeds.
///
/// Most of these never cross the facade: the resolver absorbs them through
/// the fallback policy and records the substitution in provenance.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("{feed} request failed: {msg}")]
    Transport { feed: &'static str, msg: String },

    #[error("{feed} returned status {status}")]
    Status { feed: &'static str, status: u16 },

    #[error("{feed} circuit breaker is open")]
    CircuitOpen { feed: &'static str },

    #[error("{feed} response could not be decoded: {msg}")]
    Decode { feed: &'static str, msg: String },

    #[error("{feed} did not answer within {timeout:?}")]
    TimedOut { feed: &'static str, timeout: Duration },

    #[error("ticker '{0}' unknown to the lender source")]
    UnknownTicker(String),

    #[error("no fallback left for '{0}': stock row carries no minimum borrow rate")]
    FallbacksExhausted(String),
}

impl FeedError {
    /// Whether another attempt against the same endpoint can succeed.
    ///
    /// Connection-level failures, timeouts, and 5xx responses are retried;
    /// 4xx responses are authoritative and are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::TimedOut { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether this outcome counts against the endpoint's circuit breaker.
    ///
    /// A 4xx is a healthy endpoint giving an authoritative answer, so only
    /// transport failures, timeouts, and 5xx responses trip the breaker.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::TimedOut { .. } | Self::Status { status: 500.., .. }
        )
    }
}

/// Errors raised by the cache layer.
///
/// The cache wrapper degrades these to misses/no-ops; they surface only in
/// logs and counters, never to the facade.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Invariant violations inside the fee calculation itself.
#[derive(Debug, Error)]
pub enum CalcError {
    #[error("breakdown sum mismatch: components total {components}, reported {reported}")]
    SumMismatch {
        components: Decimal,
        reported: Decimal,
    },
}

/// Errors raised by the audit sink.
///
/// Emission is best-effort: these are logged by the drain worker and never
/// reach the facade.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink failure: {0}")]
    Sink(String),

    #[error("audit record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors raised while loading [`Settings`](crate::config::Settings).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {msg}")]
    Invalid { key: &'static str, msg: String },

    #[error("missing required setting {0}")]
    Missing(&'static str),
}

/// Stable error codes exposed to the HTTP gateway.
///
/// `Unauthorized` and `RateLimitExceeded` belong to collaborators in front
/// of the facade (auth middleware, admission control); they are part of the
/// taxonomy so the gateway can share one vocabulary, but no engine error
/// maps to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidParameter,
    TickerNotFound,
    ClientNotFound,
    CalculationError,
    ExternalApiUnavailable,
    Unauthorized,
    RateLimitExceeded,
}

impl serde::Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.into())
    }
}

impl EngineError {
    /// Maps an internal error kind onto the stable gateway taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) | Self::Config(_) => ErrorCode::InvalidParameter,
            Self::Data(DataError::TickerNotFound(_)) => ErrorCode::TickerNotFound,
            Self::Data(DataError::ClientNotFound(_)) => ErrorCode::ClientNotFound,
            Self::Data(DataError::Store(_)) => ErrorCode::ExternalApiUnavailable,
            Self::Feed(FeedError::UnknownTicker(_)) => ErrorCode::TickerNotFound,
            Self::Feed(_) | Self::Cache(_) | Self::Audit(_) => ErrorCode::ExternalApiUnavailable,
            Self::Calc(_) => ErrorCode::CalculationError,
            Self::DeadlineExceeded(_) => ErrorCode::ExternalApiUnavailable,
        }
    }

    /// Message safe to show to API callers.
    ///
    /// Upstream URLs, SQL, and stack context stay in the logs; the public
    /// message only ever names the parameter or entity the caller sent.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::Data(DataError::TickerNotFound(t)) => format!("ticker '{t}' not found"),
            Self::Data(DataError::ClientNotFound(c)) => format!("client '{c}' not found"),
            Self::Feed(FeedError::UnknownTicker(t)) => format!("ticker '{t}' not found"),
            Self::Calc(_) => "fee calculation failed".to_string(),
            Self::DeadlineExceeded(_) => "request timed out".to_string(),
            _ => "external pricing data temporarily unavailable".to_string(),
        }
    }
}
