use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use crate::audit::{AuditEmitter, AuditRecord, AuditSink, TracingSink};
use crate::cache::{Cache, CacheBackend, CacheCategory, MemoryCache, RedisCache};
use crate::config::Settings;
use crate::deadline::Deadline;
use crate::domain::{
    BorrowStatus, ClientConfig, ClientId, FeeBreakdown, Provenance, ResolvedRate, Ticker,
};
use crate::error::{ConfigError, DataError, EngineError, EngineResult, ErrorCode, ValidationError};
use crate::fee;
use crate::feeds::{
    BreakerState, CircuitBreaker, EventFeed, HttpEventFeed, HttpLenderFeed, HttpVolatilityFeed,
    LenderFeed, VolatilityFeed,
};
use crate::resolver::RateResolver;
use crate::store::{CachingClientStore, ClientStore, PgStore, StockStore};

/// One locate-fee request, as the gateway hands it over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocateRequest {
    pub ticker: String,
    pub position_value: Decimal,
    pub loan_days: i64,
    pub client_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Everything the engine is built from, for dependency-injected assembly.
///
/// `connect` builds these from live backends; tests hand in memory stores
/// and stub feeds (feeds assembled this way carry no circuit breakers, so
/// `health` reports no feed entries for them).
pub struct EngineParts {
    pub settings: Settings,
    pub cache_backend: Arc<dyn CacheBackend>,
    pub stocks: Arc<dyn StockStore>,
    pub clients: Arc<dyn ClientStore>,
    pub lender: Arc<dyn LenderFeed>,
    pub volatility: Arc<dyn VolatilityFeed>,
    pub events: Arc<dyn EventFeed>,
    pub sink: Arc<dyn AuditSink>,
}

/// Completed calculation as stored under `calculation:*` for burst dedup.
/// Provenance rides along so a cache hit still audits truthfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedCalculation {
    breakdown: FeeBreakdown,
    provenance: Provenance,
}

/// The pricing facade handed to HTTP adapters.
///
/// Thin by design: validate, load the client, delegate to the resolver and
/// the fee calculator, emit the audit record, translate errors. Everything
/// interesting happens in the components underneath.
pub struct LocateEngine {
    settings: Settings,
    cache: Cache,
    stocks: Arc<dyn StockStore>,
    clients: Arc<dyn ClientStore>,
    resolver: RateResolver,
    audit: AuditEmitter,
    breakers: Vec<Arc<CircuitBreaker>>,
}

impl LocateEngine {
    /// Builds an engine against live backends: Redis (in-process cache when
    /// unconfigured), Postgres, and the three HTTP feeds.
    pub async fn connect(settings: Settings) -> EngineResult<Self> {
        let cache_backend: Arc<dyn CacheBackend> = match &settings.redis_url {
            Some(url) => Arc::new(RedisCache::connect(url).await?),
            None => {
                warn!("no redis url configured, falling back to the in-process cache");
                Arc::new(MemoryCache::new())
            }
        };

        let database_url = settings
            .database_url
            .clone()
            .ok_or(ConfigError::Missing("LOCATE_DATABASE_URL"))?;
        let store = Arc::new(PgStore::connect(&database_url).await?);

        let lender_breaker = Arc::new(CircuitBreaker::new("lender_api", settings.breaker));
        let volatility_breaker = Arc::new(CircuitBreaker::new("volatility_api", settings.breaker));
        let event_breaker = Arc::new(CircuitBreaker::new("event_api", settings.breaker));

        let lender = Arc::new(HttpLenderFeed::new(&settings, lender_breaker.clone())?);
        let volatility = Arc::new(HttpVolatilityFeed::new(&settings, volatility_breaker.clone())?);
        let events = Arc::new(HttpEventFeed::new(&settings, event_breaker.clone())?);

        let mut engine = Self::assemble(EngineParts {
            settings,
            cache_backend,
            stocks: store.clone(),
            clients: store,
            lender,
            volatility,
            events,
            sink: Arc::new(TracingSink),
        });
        engine.breakers = vec![lender_breaker, volatility_breaker, event_breaker];
        Ok(engine)
    }

    /// Builds an engine from explicit parts.
    pub fn assemble(parts: EngineParts) -> Self {
        let cache = Cache::new(parts.cache_backend, &parts.settings);
        let clients: Arc<dyn ClientStore> = Arc::new(CachingClientStore::new(
            parts.clients,
            cache.clone(),
        ));
        let resolver = RateResolver::new(
            &parts.settings,
            parts.stocks.clone(),
            parts.lender,
            parts.volatility,
            parts.events,
            cache.clone(),
        );
        let audit = AuditEmitter::start(parts.sink, parts.settings.audit_queue);

        Self {
            settings: parts.settings,
            cache,
            stocks: parts.stocks,
            clients,
            resolver,
            audit,
            breakers: Vec::new(),
        }
    }

    /// Current borrow rate for one ticker.
    pub async fn get_borrow_rate(&self, ticker: &str) -> EngineResult<ResolvedRate> {
        let deadline = Deadline::within(self.settings.request_deadline);
        let ticker = Ticker::parse(ticker)?;
        self.resolver.resolve_rate(&ticker, deadline).await
    }

    /// Prices one locate and emits the audit record.
    #[tracing::instrument(skip(self, request), fields(ticker = %request.ticker, client = %request.client_id))]
    pub async fn calculate_fee(&self, request: LocateRequest) -> EngineResult<FeeBreakdown> {
        let deadline = Deadline::within(self.settings.request_deadline);

        let ticker = Ticker::parse(&request.ticker)?;
        let position_value = fee::validate_position(request.position_value)?;
        let loan_days = fee::validate_loan_days(request.loan_days)?;
        if request.client_id.trim().is_empty() {
            return Err(ValidationError::EmptyClientId.into());
        }
        let client_id = ClientId::from(request.client_id.as_str());

        let client = self.load_client(&client_id, deadline).await?;

        let calc_key = calculation_key(&ticker, &client_id, position_value, loan_days);
        if self.settings.calculation_cache {
            if let Some(hit) = self
                .cache
                .get_json::<CachedCalculation>(CacheCategory::Calculation, Some(&calc_key))
                .await
            {
                self.emit_audit(&request, &ticker, &client, &hit.breakdown, hit.provenance);
                return Ok(hit.breakdown);
            }
        }

        let resolved = self.resolver.resolve_rate(&ticker, deadline).await?;
        let breakdown = fee::calculate(&resolved, &client, position_value, loan_days)?;

        if self.settings.calculation_cache {
            self.cache
                .put_json(
                    CacheCategory::Calculation,
                    Some(&calc_key),
                    &CachedCalculation {
                        breakdown: breakdown.clone(),
                        provenance: resolved.provenance,
                    },
                )
                .await;
        }

        self.emit_audit(&request, &ticker, &client, &breakdown, resolved.provenance);
        Ok(breakdown)
    }

    /// Component statuses for the gateway's `/health`.
    pub async fn health(&self) -> EngineHealth {
        let (cache_ok, store_ok) =
            futures::join!(self.cache.healthy(), self.stocks.healthy());

        let mut components = BTreeMap::new();
        components.insert(
            "database",
            if store_ok {
                ComponentStatus::Connected
            } else {
                ComponentStatus::Unavailable
            },
        );
        components.insert(
            "cache",
            if cache_ok {
                ComponentStatus::Connected
            } else {
                ComponentStatus::Unavailable
            },
        );
        for breaker in &self.breakers {
            components.insert(
                breaker.endpoint(),
                match breaker.state() {
                    BreakerState::Closed => ComponentStatus::Available,
                    BreakerState::HalfOpen => ComponentStatus::Recovering,
                    BreakerState::Open => ComponentStatus::Unavailable,
                },
            );
        }

        let degraded = components
            .values()
            .any(|status| *status == ComponentStatus::Unavailable);

        EngineHealth {
            status: if degraded {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            version: env!("CARGO_PKG_VERSION"),
            components,
            timestamp: Utc::now(),
        }
    }

    /// Cache counters, exported for the metrics collaborator.
    pub fn cache_stats(&self) -> crate::cache::CacheStatsSnapshot {
        self.cache.stats()
    }

    /// Audit records lost to backpressure since startup.
    pub fn audit_dropped(&self) -> u64 {
        self.audit.dropped()
    }

    async fn load_client(
        &self,
        client_id: &ClientId,
        deadline: Deadline,
    ) -> EngineResult<ClientConfig> {
        let lookup = timeout(deadline.remaining(), self.clients.client_by_id(client_id));
        match lookup.await {
            // Inactive clients are indistinguishable from unknown ones at
            // the API surface.
            Ok(Ok(Some(client))) if client.active => Ok(client),
            Ok(Ok(_)) => Err(DataError::ClientNotFound(client_id.to_string()).into()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::DeadlineExceeded(deadline.budget())),
        }
    }

    fn emit_audit(
        &self,
        request: &LocateRequest,
        ticker: &Ticker,
        client: &ClientConfig,
        breakdown: &FeeBreakdown,
        provenance: Provenance,
    ) {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            request_id: request
                .request_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            client_id: client.client_id.clone(),
            ticker: ticker.clone(),
            position_value: request.position_value,
            loan_days: breakdown_loan_days(request.loan_days),
            borrow_rate_used: breakdown.borrow_rate_used,
            provenance,
            breakdown: breakdown.clone(),
            fee_model: client.transaction_fee_type,
        };
        self.audit.emit(record);
    }
}

fn breakdown_loan_days(loan_days: i64) -> u32 {
    // Validation ran before any audit record can be built.
    loan_days.clamp(0, i64::from(u32::MAX)) as u32
}

fn calculation_key(
    ticker: &Ticker,
    client_id: &ClientId,
    position_value: Decimal,
    loan_days: u32,
) -> String {
    format!(
        "{}:{}:{}:{}",
        ticker,
        client_id,
        position_value.normalize(),
        loan_days
    )
}

// ================================================================================================
// Gateway-facing DTOs
// ================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ComponentStatus {
    Connected,
    Available,
    Recovering,
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub status: HealthStatus,
    pub version: &'static str,
    pub components: BTreeMap<&'static str, ComponentStatus>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownBody {
    pub borrow_cost: Decimal,
    pub markup: Decimal,
    pub transaction_fees: Decimal,
}

/// Body of a successful `POST /api/v1/calculate-locate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculateLocateResponse {
    pub status: String,
    pub total_fee: Decimal,
    pub breakdown: BreakdownBody,
    pub borrow_rate_used: Decimal,
}

impl From<&FeeBreakdown> for CalculateLocateResponse {
    fn from(breakdown: &FeeBreakdown) -> Self {
        Self {
            status: "success".to_string(),
            total_fee: breakdown.total_fee,
            breakdown: BreakdownBody {
                borrow_cost: breakdown.borrow_cost,
                markup: breakdown.markup,
                transaction_fees: breakdown.transaction_fees,
            },
            borrow_rate_used: crate::rounding::round_rate(breakdown.borrow_rate_used),
        }
    }
}

/// Body of a successful `GET /api/v1/rates/{ticker}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorrowRateResponse {
    pub status: String,
    pub ticker: Ticker,
    pub current_rate: Decimal,
    pub borrow_status: BorrowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volatility_index: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_risk_factor: Option<u8>,
    pub last_updated: DateTime<Utc>,
}

impl From<&ResolvedRate> for BorrowRateResponse {
    fn from(resolved: &ResolvedRate) -> Self {
        Self {
            status: "success".to_string(),
            ticker: resolved.ticker.clone(),
            current_rate: crate::rounding::round_rate(resolved.current_rate),
            borrow_status: resolved.borrow_status,
            volatility_index: resolved.volatility_index,
            event_risk_factor: resolved.event_risk_factor,
            last_updated: resolved.computed_at,
        }
    }
}

/// Error body shared by every endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub status: String,
    pub error: ErrorCode,
    pub message: String,
}

impl From<&EngineError> for ErrorBody {
    fn from(error: &EngineError) -> Self {
        Self {
            status: "error".to_string(),
            error: error.code(),
            message: error.public_message(),
        }
    }
}
