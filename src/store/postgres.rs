use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use super::{ClientStore, StockStore};
use crate::domain::{BorrowStatus, ClientConfig, ClientId, Stock, Ticker, TransactionFeeType};
use crate::error::{DataError, EngineResult};

/// Postgres-backed reference-data store.
///
/// Connections come out of the pool for the duration of a single query and
/// go straight back; nothing upstream of the repository ever holds one
/// across a feed call.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[tracing::instrument(skip(url), err)]
    pub async fn connect(url: &str) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(store_error)?;
        info!("relational store connected");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn store_error(e: sqlx::Error) -> DataError {
    DataError::Store(e.to_string())
}

#[derive(sqlx::FromRow)]
struct StockRow {
    ticker: String,
    borrow_status: String,
    lender_api_id: Option<String>,
    min_borrow_rate: Option<Decimal>,
    last_updated: DateTime<Utc>,
}

impl TryFrom<StockRow> for Stock {
    type Error = DataError;

    fn try_from(row: StockRow) -> Result<Self, Self::Error> {
        let ticker = Ticker::parse(&row.ticker)
            .map_err(|e| DataError::Store(format!("corrupt stock row: {e}")))?;
        let borrow_status = BorrowStatus::from_str(&row.borrow_status).map_err(|_| {
            DataError::Store(format!(
                "corrupt stock row: unknown borrow status '{}'",
                row.borrow_status
            ))
        })?;
        Ok(Stock {
            ticker,
            borrow_status,
            lender_api_id: row.lender_api_id,
            min_borrow_rate: row.min_borrow_rate,
            last_updated: row.last_updated,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ClientRow {
    client_id: String,
    markup_percentage: Decimal,
    transaction_fee_type: String,
    transaction_amount: Decimal,
    active: bool,
    last_updated: DateTime<Utc>,
}

impl TryFrom<ClientRow> for ClientConfig {
    type Error = DataError;

    fn try_from(row: ClientRow) -> Result<Self, Self::Error> {
        let transaction_fee_type =
            TransactionFeeType::from_str(&row.transaction_fee_type).map_err(|_| {
                DataError::Store(format!(
                    "corrupt broker row: unknown fee type '{}'",
                    row.transaction_fee_type
                ))
            })?;
        Ok(ClientConfig {
            client_id: ClientId(row.client_id),
            markup_percentage: row.markup_percentage,
            transaction_fee_type,
            transaction_amount: row.transaction_amount,
            active: row.active,
            last_updated: row.last_updated,
        })
    }
}

#[async_trait]
impl StockStore for PgStore {
    async fn stock_by_ticker(&self, ticker: &Ticker) -> EngineResult<Option<Stock>> {
        let row = sqlx::query_as::<_, StockRow>(
            "SELECT ticker, borrow_status, lender_api_id, min_borrow_rate, last_updated \
             FROM stocks WHERE ticker = $1",
        )
        .bind(ticker.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(Stock::try_from).transpose().map_err(Into::into)
    }

    async fn healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[async_trait]
impl ClientStore for PgStore {
    async fn client_by_id(&self, client_id: &ClientId) -> EngineResult<Option<ClientConfig>> {
        let row = sqlx::query_as::<_, ClientRow>(
            "SELECT client_id, markup_percentage, transaction_fee_type, transaction_amount, \
             active, last_updated \
             FROM brokers WHERE client_id = $1",
        )
        .bind(client_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(ClientConfig::try_from)
            .transpose()
            .map_err(Into::into)
    }

    async fn healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
