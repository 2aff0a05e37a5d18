use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, EngineResult};
use crate::impl_from_primitive;

/// Represents a validated API base URL.
///
/// Keeps endpoints from being confused with generic strings in function
/// signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Url(pub String);
impl_from_primitive!(Url, String);

impl From<&str> for Url {
    fn from(value: &str) -> Self {
        Url(value.to_string())
    }
}

/// Represents an API key for authenticating against a data source.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiKey(pub String);
impl_from_primitive!(ApiKey, String);

impl From<&str> for ApiKey {
    fn from(value: &str) -> Self {
        ApiKey(value.to_string())
    }
}

// Keys must never end up in logs via {:?}.
impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Connection settings for one external data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FeedSettings {
    pub base_url: Option<Url>,
    pub api_key: Option<ApiKey>,
}

/// Retry schedule for external calls: exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, including the first (no retry on 4xx regardless).
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Circuit breaker tuning, shared by all feed endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that trip the breaker open.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe.
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Time-to-live per cache category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPolicy {
    /// `borrow_rate:*` - rates drift on minute scale.
    pub borrow_rate: Duration,
    /// `volatility:*` - volatility moves slowly intraday.
    pub volatility: Duration,
    /// `market_volatility` - same cadence as per-ticker volatility.
    pub market_volatility: Duration,
    /// `event_risk:*` - event calendars change hourly at most.
    pub event_risk: Duration,
    /// `broker_config:*` - manual changes, moderate freshness.
    pub broker_config: Duration,
    /// `calculation:*` - short lived, for burst dedup.
    pub calculation: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            borrow_rate: Duration::from_secs(300),
            volatility: Duration::from_secs(900),
            market_volatility: Duration::from_secs(900),
            event_risk: Duration::from_secs(3600),
            broker_config: Duration::from_secs(1800),
            calculation: Duration::from_secs(60),
        }
    }
}

/// Rate-adjustment tuning constants.
///
/// The adjustment pipeline is `base * (1 + vol_index * vol_factor [+ bumps])
/// * (1 + risk/10 * event_factor)`, clamped to the stock and global minimums.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateTuning {
    pub vol_factor: Decimal,
    pub high_vol_threshold: Decimal,
    pub high_vol_bump: Decimal,
    pub extreme_vol_threshold: Decimal,
    pub extreme_vol_bump: Decimal,
    pub event_factor: Decimal,
}

impl Default for RateTuning {
    fn default() -> Self {
        Self {
            // 0.01 per volatility point
            vol_factor: Decimal::new(1, 2),
            high_vol_threshold: Decimal::from(30),
            // +0.05 absolute above the high threshold
            high_vol_bump: Decimal::new(5, 2),
            extreme_vol_threshold: Decimal::from(40),
            // a further +0.05 absolute above the extreme threshold
            extreme_vol_bump: Decimal::new(5, 2),
            event_factor: Decimal::new(5, 2),
        }
    }
}

/// Engine configuration, loaded once at startup and immutable afterwards.
///
/// Every value has a default; `from_env` overrides from `LOCATE_*`
/// environment variables and the `with_*` builders override programmatically
/// (tests use the builders exclusively).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub lender: FeedSettings,
    pub volatility: FeedSettings,
    pub events: FeedSettings,

    pub ttl: TtlPolicy,
    pub tuning: RateTuning,
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,

    /// Market-wide volatility substitute when every volatility source fails.
    pub default_volatility: Decimal,
    /// Absolute floor under every resolved rate, stock floors included.
    pub global_min_rate: Decimal,

    /// Per-request timeout for one external call.
    pub feed_timeout: Duration,
    /// End-to-end budget for one facade request.
    pub request_deadline: Duration,

    /// Prefix stamped onto every cache key.
    pub cache_namespace: String,
    /// Bounded audit queue length before drop-oldest kicks in.
    pub audit_queue: usize,
    /// Whether finished calculations are cached under `calculation:*`.
    pub calculation_cache: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            lender: FeedSettings::default(),
            volatility: FeedSettings::default(),
            events: FeedSettings::default(),
            ttl: TtlPolicy::default(),
            tuning: RateTuning::default(),
            retry: RetrySettings::default(),
            breaker: BreakerSettings::default(),
            // 20.0 points
            default_volatility: Decimal::from(20),
            // 25 bps
            global_min_rate: Decimal::new(25, 4),
            feed_timeout: Duration::from_secs(5),
            request_deadline: Duration::from_secs(10),
            cache_namespace: "locate".to_string(),
            audit_queue: 1024,
            calculation_cache: true,
        }
    }
}

impl Settings {
    /// Loads settings from `LOCATE_*` environment variables, falling back to
    /// the defaults above for anything unset.
    pub fn from_env() -> EngineResult<Self> {
        let mut settings = Self::default();

        settings.database_url = env_string("LOCATE_DATABASE_URL");
        settings.redis_url = env_string("LOCATE_REDIS_URL");

        settings.lender = feed_from_env("LOCATE_LENDER_API_URL", "LOCATE_LENDER_API_KEY");
        settings.volatility =
            feed_from_env("LOCATE_VOLATILITY_API_URL", "LOCATE_VOLATILITY_API_KEY");
        settings.events = feed_from_env("LOCATE_EVENT_API_URL", "LOCATE_EVENT_API_KEY");

        settings.ttl.borrow_rate =
            env_duration("LOCATE_TTL_BORROW_RATE", settings.ttl.borrow_rate)?;
        settings.ttl.volatility = env_duration("LOCATE_TTL_VOLATILITY", settings.ttl.volatility)?;
        settings.ttl.market_volatility = env_duration(
            "LOCATE_TTL_MARKET_VOLATILITY",
            settings.ttl.market_volatility,
        )?;
        settings.ttl.event_risk = env_duration("LOCATE_TTL_EVENT_RISK", settings.ttl.event_risk)?;
        settings.ttl.broker_config =
            env_duration("LOCATE_TTL_BROKER_CONFIG", settings.ttl.broker_config)?;
        settings.ttl.calculation =
            env_duration("LOCATE_TTL_CALCULATION", settings.ttl.calculation)?;

        settings.default_volatility =
            env_decimal("LOCATE_DEFAULT_VOLATILITY", settings.default_volatility)?;
        settings.global_min_rate =
            env_decimal("LOCATE_GLOBAL_MIN_RATE", settings.global_min_rate)?;
        settings.tuning.vol_factor = env_decimal("LOCATE_VOL_FACTOR", settings.tuning.vol_factor)?;
        settings.tuning.event_factor =
            env_decimal("LOCATE_EVENT_FACTOR", settings.tuning.event_factor)?;

        settings.breaker.failure_threshold = env_u32(
            "LOCATE_BREAKER_THRESHOLD",
            settings.breaker.failure_threshold,
        )?;
        settings.breaker.cooldown =
            env_duration("LOCATE_BREAKER_COOLDOWN", settings.breaker.cooldown)?;

        settings.feed_timeout = env_duration("LOCATE_FEED_TIMEOUT", settings.feed_timeout)?;
        settings.request_deadline =
            env_duration("LOCATE_REQUEST_DEADLINE", settings.request_deadline)?;
        settings.audit_queue = env_u32("LOCATE_AUDIT_QUEUE", settings.audit_queue as u32)? as usize;

        Ok(settings)
    }

    pub fn with_database_url(self, url: impl Into<String>) -> Self {
        Self {
            database_url: Some(url.into()),
            ..self
        }
    }

    pub fn with_redis_url(self, url: impl Into<String>) -> Self {
        Self {
            redis_url: Some(url.into()),
            ..self
        }
    }

    pub fn with_ttl(self, ttl: TtlPolicy) -> Self {
        Self { ttl, ..self }
    }

    pub fn with_tuning(self, tuning: RateTuning) -> Self {
        Self { tuning, ..self }
    }

    pub fn with_retry(self, retry: RetrySettings) -> Self {
        Self { retry, ..self }
    }

    pub fn with_breaker(self, breaker: BreakerSettings) -> Self {
        Self { breaker, ..self }
    }

    pub fn with_default_volatility(self, default_volatility: Decimal) -> Self {
        Self {
            default_volatility,
            ..self
        }
    }

    pub fn with_global_min_rate(self, global_min_rate: Decimal) -> Self {
        Self {
            global_min_rate,
            ..self
        }
    }

    pub fn with_feed_timeout(self, feed_timeout: Duration) -> Self {
        Self {
            feed_timeout,
            ..self
        }
    }

    pub fn with_request_deadline(self, request_deadline: Duration) -> Self {
        Self {
            request_deadline,
            ..self
        }
    }

    pub fn with_audit_queue(self, audit_queue: usize) -> Self {
        Self {
            audit_queue,
            ..self
        }
    }

    pub fn with_calculation_cache(self, calculation_cache: bool) -> Self {
        Self {
            calculation_cache,
            ..self
        }
    }
}

fn env_string(key: &'static str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn feed_from_env(url_key: &'static str, api_key_key: &'static str) -> FeedSettings {
    FeedSettings {
        base_url: env_string(url_key).map(Url),
        api_key: env_string(api_key_key).map(ApiKey),
    }
}

fn env_duration(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env_string(key) {
        Some(raw) => parse_duration(key, &raw),
        None => Ok(default),
    }
}

fn env_decimal(key: &'static str, default: Decimal) -> Result<Decimal, ConfigError> {
    match env_string(key) {
        Some(raw) => parse_decimal(key, &raw),
        None => Ok(default),
    }
}

fn env_u32(key: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env_string(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key,
            msg: format!("'{raw}' is not an unsigned integer"),
        }),
        None => Ok(default),
    }
}

/// Accepts humantime strings ("300s", "5m") and bare seconds ("300").
fn parse_duration(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).map_err(|e| ConfigError::Invalid {
        key,
        msg: e.to_string(),
    })
}

fn parse_decimal(key: &'static str, raw: &str) -> Result<Decimal, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        key,
        msg: format!("'{raw}' is not a decimal number"),
    })
}
