//! StockStore trait: the read boundary of the stock dataset.
//!
//! Tool handlers only ever read through this trait. Ingestion (refresh,
//! upsert, dedup) belongs to whoever owns the concrete store.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::StoreError;

/// Basic information and valuation metrics for one listed stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    /// Exchange code (e.g., "600000")
    pub code: String,
    pub name: String,
    /// Market (e.g., "SH", "SZ")
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub list_date: Option<NaiveDate>,

    #[serde(default)]
    pub pe_ratio: Option<f64>,
    #[serde(default)]
    pub pb_ratio: Option<f64>,
    /// Return on equity (%)
    #[serde(default)]
    pub roe: Option<f64>,

    /// Total market cap (100M CNY)
    #[serde(default)]
    pub total_market_cap: Option<f64>,
    #[serde(default)]
    pub circulating_market_cap: Option<f64>,
    /// Turnover rate (%)
    #[serde(default)]
    pub turnover_rate: Option<f64>,
    #[serde(default)]
    pub total_assets: Option<f64>,
    #[serde(default)]
    pub net_assets: Option<f64>,

    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
}

impl Stock {
    /// A record with only the identifying fields set.
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            market: None,
            industry: None,
            list_date: None,
            pe_ratio: None,
            pb_ratio: None,
            roe: None,
            total_market_cap: None,
            circulating_market_cap: None,
            turnover_rate: None,
            total_assets: None,
            net_assets: None,
            updated_at: None,
        }
    }
}

/// One trading day of price and volume data for a stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub code: String,
    pub trade_date: NaiveDate,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    /// Shares traded
    #[serde(default)]
    pub volume: Option<i64>,
    /// Turnover in CNY
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub change: Option<f64>,
    #[serde(default)]
    pub pct_change: Option<f64>,
    #[serde(default)]
    pub turnover_rate: Option<f64>,
}

/// Predicate for `filter_stocks`. Every bound is optional; `limit` is not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockFilter {
    pub min_pe: Option<f64>,
    pub max_pe: Option<f64>,
    pub min_pb: Option<f64>,
    pub max_pb: Option<f64>,
    pub min_market_cap: Option<f64>,
    pub max_market_cap: Option<f64>,
    /// Substring match on industry
    pub industry: Option<String>,
    pub limit: u32,
}

impl StockFilter {
    pub fn with_limit(limit: u32) -> Self {
        Self {
            min_pe: None,
            max_pe: None,
            min_pb: None,
            max_pb: None,
            min_market_cap: None,
            max_market_cap: None,
            industry: None,
            limit,
        }
    }
}

/// Aggregate counts over the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub total_stocks: i64,
    pub total_daily_records: i64,
    pub latest_trade_date: Option<NaiveDate>,
}

/// A single cell from an ad-hoc query, as decoded from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    /// The engine returned a value the store could not decode.
    Undecodable { type_name: String, reason: String },
}

/// Column names plus raw rows of an ad-hoc read query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// The data-layer capability consumed by the stock tools.
///
/// Implementations must be safe for concurrent reads from independent runs.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// The backend name (e.g., "sqlite").
    fn name(&self) -> &str;

    /// Stocks whose code or name contains `keyword`.
    async fn search_stocks(&self, keyword: &str, limit: u32) -> Result<Vec<Stock>, StoreError>;

    /// One stock by exact code.
    async fn get_stock(&self, code: &str) -> Result<Option<Stock>, StoreError>;

    /// The most recent `limit` trading records for `code`, newest first.
    async fn daily_history(&self, code: &str, limit: u32) -> Result<Vec<DailyRecord>, StoreError>;

    async fn filter_stocks(&self, filter: &StockFilter) -> Result<Vec<Stock>, StoreError>;

    async fn stats(&self) -> Result<DatabaseStats, StoreError>;

    /// Run an already-validated read-only query.
    ///
    /// Implementations should execute on a handle that cannot write, so a
    /// statement that slipped past validation still fails. A statement still
    /// running after `timeout` must be stopped inside the engine and reported
    /// as [`StoreError::Timeout`]; dropping the future alone leaves it running.
    async fn run_read_query(&self, sql: &str, timeout: Duration) -> Result<QueryOutput, StoreError>;
}
