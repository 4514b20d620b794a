//! SQLite stock store.
//!
//! Uses a single SQLite database file with two tables:
//! - `stocks`: one row per listed stock (basic info and valuation)
//! - `stock_daily`: one row per stock per trading day, unique on
//!   `(code, trade_date)`
//!
//! Two pools are opened on the same file. The writable pool owns migrations
//! and upserts; ad-hoc queries from `execute_sql_query` only ever see the
//! read-only pool (`PRAGMA query_only` on every connection).

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Column, Executor, QueryBuilder, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::{Duration, Instant};
use stockchat_core::error::StoreError;
use stockchat_core::store::{
    DailyRecord, DatabaseStats, QueryOutput, SqlValue, Stock, StockFilter, StockStore,
};
use tracing::{debug, info, warn};

/// A SQLite-backed [`StockStore`].
pub struct SqliteStockStore {
    pool: SqlitePool,
    read_pool: SqlitePool,
}

impl SqliteStockStore {
    /// Open (creating if needed) the database at `url` and migrate it.
    ///
    /// `url` is a sqlx SQLite URL such as `sqlite:///var/lib/stocks.db`.
    /// An in-memory URL works, but ad-hoc queries then share the writable
    /// connection and rely on validation alone.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Connection(format!("Invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every in-memory connection is its own database
        let write_connections = if in_memory { 1 } else { max_connections.max(1) };

        let pool = SqlitePoolOptions::new()
            .max_connections(write_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open SQLite: {e}")))?;

        Self::run_migrations(&pool).await?;

        let read_pool = if in_memory {
            warn!("In-memory database: ad-hoc queries share the writable connection");
            pool.clone()
        } else {
            let read_options = SqliteConnectOptions::from_str(url)
                .map_err(|e| StoreError::Connection(format!("Invalid SQLite URL: {e}")))?
                .pragma("query_only", "ON");

            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_with(read_options)
                .await
                .map_err(|e| {
                    StoreError::Connection(format!("Failed to open read-only SQLite: {e}"))
                })?
        };

        info!("SQLite stock store initialized at {url}");
        Ok(Self { pool, read_pool })
    }

    /// Create tables and indexes.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stocks (
                code                   TEXT PRIMARY KEY NOT NULL,
                name                   TEXT NOT NULL,
                market                 TEXT,
                industry               TEXT,
                list_date              TEXT,
                total_assets           REAL,
                net_assets             REAL,
                pe_ratio               REAL,
                pb_ratio               REAL,
                roe                    REAL,
                total_market_cap       REAL,
                circulating_market_cap REAL,
                turnover_rate          REAL,
                updated_at             TEXT
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| StoreError::Migration(format!("stocks table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stock_daily (
                id                     INTEGER PRIMARY KEY AUTOINCREMENT,
                code                   TEXT NOT NULL,
                trade_date             TEXT NOT NULL,
                open                   REAL,
                close                  REAL,
                high                   REAL,
                low                    REAL,
                volume                 INTEGER,
                amount                 REAL,
                change                 REAL,
                pct_change             REAL,
                total_market_cap       REAL,
                circulating_market_cap REAL,
                turnover_rate          REAL,
                created_at             TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| StoreError::Migration(format!("stock_daily table: {e}")))?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_code_date ON stock_daily(code, trade_date)",
        )
        .execute(pool)
        .await
        .map_err(|e| StoreError::Migration(format!("code/date index: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_stocks_name ON stocks(name)")
            .execute(pool)
            .await
            .map_err(|e| StoreError::Migration(format!("name index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Insert or update stock rows, keyed by code. Returns rows written.
    pub async fn upsert_stocks(&self, stocks: &[Stock]) -> Result<u64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::QueryFailed(format!("BEGIN failed: {e}")))?;

        let mut written = 0;
        for stock in stocks {
            let updated_at = stock
                .updated_at
                .unwrap_or_else(|| chrono::Local::now().naive_local());
            let result = sqlx::query(
                r#"
                INSERT INTO stocks (code, name, market, industry, list_date, total_assets,
                    net_assets, pe_ratio, pb_ratio, roe, total_market_cap,
                    circulating_market_cap, turnover_rate, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                ON CONFLICT(code) DO UPDATE SET
                    name = excluded.name,
                    market = excluded.market,
                    industry = excluded.industry,
                    list_date = excluded.list_date,
                    total_assets = excluded.total_assets,
                    net_assets = excluded.net_assets,
                    pe_ratio = excluded.pe_ratio,
                    pb_ratio = excluded.pb_ratio,
                    roe = excluded.roe,
                    total_market_cap = excluded.total_market_cap,
                    circulating_market_cap = excluded.circulating_market_cap,
                    turnover_rate = excluded.turnover_rate,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&stock.code)
            .bind(&stock.name)
            .bind(&stock.market)
            .bind(&stock.industry)
            .bind(stock.list_date)
            .bind(stock.total_assets)
            .bind(stock.net_assets)
            .bind(stock.pe_ratio)
            .bind(stock.pb_ratio)
            .bind(stock.roe)
            .bind(stock.total_market_cap)
            .bind(stock.circulating_market_cap)
            .bind(stock.turnover_rate)
            .bind(updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("stock upsert failed: {e}")))?;
            written += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::QueryFailed(format!("COMMIT failed: {e}")))?;
        debug!(rows = written, "Upserted stocks");
        Ok(written)
    }

    /// Insert or update daily records, keyed by `(code, trade_date)`.
    pub async fn upsert_daily(&self, records: &[DailyRecord]) -> Result<u64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::QueryFailed(format!("BEGIN failed: {e}")))?;

        let mut written = 0;
        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO stock_daily (code, trade_date, open, close, high, low, volume,
                    amount, change, pct_change, turnover_rate)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(code, trade_date) DO UPDATE SET
                    open = excluded.open,
                    close = excluded.close,
                    high = excluded.high,
                    low = excluded.low,
                    volume = excluded.volume,
                    amount = excluded.amount,
                    change = excluded.change,
                    pct_change = excluded.pct_change,
                    turnover_rate = excluded.turnover_rate
                "#,
            )
            .bind(&record.code)
            .bind(record.trade_date)
            .bind(record.open)
            .bind(record.close)
            .bind(record.high)
            .bind(record.low)
            .bind(record.volume)
            .bind(record.amount)
            .bind(record.change)
            .bind(record.pct_change)
            .bind(record.turnover_rate)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("daily upsert failed: {e}")))?;
            written += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::QueryFailed(format!("COMMIT failed: {e}")))?;
        debug!(rows = written, "Upserted daily records");
        Ok(written)
    }

    /// Parse a `Stock` from a SQLite row.
    fn row_to_stock(row: &SqliteRow) -> Result<Stock, StoreError> {
        let column = |name: &str, e: sqlx::Error| StoreError::QueryFailed(format!("{name} column: {e}"));

        Ok(Stock {
            code: row.try_get("code").map_err(|e| column("code", e))?,
            name: row.try_get("name").map_err(|e| column("name", e))?,
            market: row.try_get("market").map_err(|e| column("market", e))?,
            industry: row.try_get("industry").map_err(|e| column("industry", e))?,
            // Dates written by other tools may not parse; treat them as unknown
            list_date: row.try_get::<Option<NaiveDate>, _>("list_date").unwrap_or(None),
            pe_ratio: row.try_get("pe_ratio").map_err(|e| column("pe_ratio", e))?,
            pb_ratio: row.try_get("pb_ratio").map_err(|e| column("pb_ratio", e))?,
            roe: row.try_get("roe").map_err(|e| column("roe", e))?,
            total_market_cap: row
                .try_get("total_market_cap")
                .map_err(|e| column("total_market_cap", e))?,
            circulating_market_cap: row
                .try_get("circulating_market_cap")
                .map_err(|e| column("circulating_market_cap", e))?,
            turnover_rate: row
                .try_get("turnover_rate")
                .map_err(|e| column("turnover_rate", e))?,
            total_assets: row.try_get("total_assets").map_err(|e| column("total_assets", e))?,
            net_assets: row.try_get("net_assets").map_err(|e| column("net_assets", e))?,
            updated_at: row
                .try_get::<Option<NaiveDateTime>, _>("updated_at")
                .unwrap_or(None),
        })
    }

    /// Parse a `DailyRecord` from a SQLite row.
    fn row_to_daily(row: &SqliteRow) -> Result<DailyRecord, StoreError> {
        let column = |name: &str, e: sqlx::Error| StoreError::QueryFailed(format!("{name} column: {e}"));

        Ok(DailyRecord {
            code: row.try_get("code").map_err(|e| column("code", e))?,
            trade_date: row.try_get("trade_date").map_err(|e| column("trade_date", e))?,
            open: row.try_get("open").map_err(|e| column("open", e))?,
            close: row.try_get("close").map_err(|e| column("close", e))?,
            high: row.try_get("high").map_err(|e| column("high", e))?,
            low: row.try_get("low").map_err(|e| column("low", e))?,
            volume: row.try_get("volume").map_err(|e| column("volume", e))?,
            amount: row.try_get("amount").map_err(|e| column("amount", e))?,
            change: row.try_get("change").map_err(|e| column("change", e))?,
            pct_change: row.try_get("pct_change").map_err(|e| column("pct_change", e))?,
            turnover_rate: row
                .try_get("turnover_rate")
                .map_err(|e| column("turnover_rate", e))?,
        })
    }

    /// Decode one result cell by its runtime storage class.
    ///
    /// A cell that cannot be decoded degrades to `SqlValue::Undecodable`
    /// instead of failing the whole row.
    fn decode_cell(row: &SqliteRow, index: usize) -> SqlValue {
        let (is_null, type_name) = match row.try_get_raw(index) {
            Ok(raw) => (raw.is_null(), raw.type_info().name().to_ascii_uppercase()),
            Err(e) => {
                return SqlValue::Undecodable {
                    type_name: "UNKNOWN".into(),
                    reason: e.to_string(),
                };
            }
        };

        if is_null {
            return SqlValue::Null;
        }

        let decoded = match type_name.as_str() {
            "INTEGER" | "INT" | "INT8" | "BIGINT" | "BOOLEAN" => row
                .try_get_unchecked::<i64, _>(index)
                .map(SqlValue::Integer),
            "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
                row.try_get_unchecked::<f64, _>(index).map(SqlValue::Real)
            }
            "BLOB" => row
                .try_get_unchecked::<Vec<u8>, _>(index)
                .map(SqlValue::Blob),
            _ => row
                .try_get_unchecked::<String, _>(index)
                .map(SqlValue::Text),
        };

        decoded.unwrap_or_else(|e| SqlValue::Undecodable {
            type_name,
            reason: e.to_string(),
        })
    }
}

/// Escape LIKE wildcards in user text (paired with `ESCAPE '\'`).
fn like_pattern(keyword: &str) -> String {
    let escaped = keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl StockStore for SqliteStockStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn search_stocks(&self, keyword: &str, limit: u32) -> Result<Vec<Stock>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM stocks
            WHERE code LIKE ?1 ESCAPE '\' OR name LIKE ?1 ESCAPE '\'
            ORDER BY code
            LIMIT ?2
            "#,
        )
        .bind(like_pattern(keyword.trim()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Stock search: {e}")))?;

        rows.iter().map(Self::row_to_stock).collect()
    }

    async fn get_stock(&self, code: &str) -> Result<Option<Stock>, StoreError> {
        let row = sqlx::query("SELECT * FROM stocks WHERE code = ?1")
            .bind(code.trim())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Stock lookup: {e}")))?;

        row.as_ref().map(Self::row_to_stock).transpose()
    }

    async fn daily_history(&self, code: &str, limit: u32) -> Result<Vec<DailyRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM stock_daily WHERE code = ?1 ORDER BY trade_date DESC LIMIT ?2",
        )
        .bind(code.trim())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Daily history: {e}")))?;

        rows.iter().map(Self::row_to_daily).collect()
    }

    async fn filter_stocks(&self, filter: &StockFilter) -> Result<Vec<Stock>, StoreError> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM stocks WHERE 1 = 1");

        let bounds = [
            ("pe_ratio", ">=", filter.min_pe),
            ("pe_ratio", "<=", filter.max_pe),
            ("pb_ratio", ">=", filter.min_pb),
            ("pb_ratio", "<=", filter.max_pb),
            ("total_market_cap", ">=", filter.min_market_cap),
            ("total_market_cap", "<=", filter.max_market_cap),
        ];
        for (column, op, value) in bounds {
            if let Some(value) = value {
                query.push(format!(" AND {column} {op} ")).push_bind(value);
            }
        }

        if let Some(industry) = filter.industry.as_deref().filter(|s| !s.trim().is_empty()) {
            query
                .push(" AND industry LIKE ")
                .push_bind(like_pattern(industry.trim()))
                .push(" ESCAPE '\\'");
        }

        query
            .push(" ORDER BY total_market_cap IS NULL, total_market_cap DESC, code LIMIT ")
            .push_bind(i64::from(filter.limit));

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Stock filter: {e}")))?;

        rows.iter().map(Self::row_to_stock).collect()
    }

    async fn stats(&self) -> Result<DatabaseStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM stocks) AS total_stocks,
                (SELECT COUNT(*) FROM stock_daily) AS total_daily_records,
                (SELECT MAX(trade_date) FROM stock_daily) AS latest_trade_date
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Stats: {e}")))?;

        let latest: Option<String> = row
            .try_get("latest_trade_date")
            .map_err(|e| StoreError::QueryFailed(format!("latest_trade_date column: {e}")))?;

        Ok(DatabaseStats {
            total_stocks: row
                .try_get("total_stocks")
                .map_err(|e| StoreError::QueryFailed(format!("total_stocks column: {e}")))?,
            total_daily_records: row
                .try_get("total_daily_records")
                .map_err(|e| StoreError::QueryFailed(format!("total_daily_records column: {e}")))?,
            latest_trade_date: latest
                .as_deref()
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
        })
    }

    async fn run_read_query(&self, sql: &str, timeout: Duration) -> Result<QueryOutput, StoreError> {
        let deadline = Instant::now() + timeout;
        let mut conn = tokio::time::timeout(timeout, self.read_pool.acquire())
            .await
            .map_err(|_| StoreError::Timeout(timeout.as_secs()))?
            .map_err(|e| StoreError::Connection(format!("Read pool: {e}")))?;

        arm_deadline(&mut conn, deadline).await?;
        let result = fetch_read(&mut conn, sql).await;
        if let Ok(mut handle) = conn.lock_handle().await {
            handle.remove_progress_handler();
        }

        let (rows, columns) = result.map_err(|e| {
            if is_interrupt(&e) {
                warn!(timeout_secs = timeout.as_secs(), "Ad-hoc query interrupted at deadline");
                StoreError::Timeout(timeout.as_secs())
            } else {
                StoreError::QueryFailed(e.to_string())
            }
        })?;

        let rows = rows
            .iter()
            .map(|row| (0..row.len()).map(|i| Self::decode_cell(row, i)).collect())
            .collect();

        Ok(QueryOutput { columns, rows })
    }
}

/// Fetch every row of `sql` and its column names on one connection.
async fn fetch_read(
    conn: &mut SqliteConnection,
    sql: &str,
) -> Result<(Vec<SqliteRow>, Vec<String>), sqlx::Error> {
    let rows = sqlx::query(sql).fetch_all(&mut *conn).await?;

    let columns: Vec<String> = match rows.first() {
        Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
        // No rows: ask the engine for the column list
        None => conn
            .describe(sql)
            .await
            .map(|d| d.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default(),
    };
    Ok((rows, columns))
}

/// VM instructions between deadline checks.
const PROGRESS_STEPS: i32 = 1_000;

/// Make SQLite itself abort the next statement on `conn` once `deadline`
/// passes (`SQLITE_INTERRUPT`).
///
/// The handler disarms after firing. If the caller's future is dropped
/// mid-query the statement keeps running on the worker, and the handler is
/// what stops it and frees the connection.
async fn arm_deadline(conn: &mut SqliteConnection, deadline: Instant) -> Result<(), StoreError> {
    let mut handle = conn
        .lock_handle()
        .await
        .map_err(|e| StoreError::Connection(format!("Read handle: {e}")))?;
    let mut fired = false;
    handle.set_progress_handler(PROGRESS_STEPS, move || {
        if fired || Instant::now() < deadline {
            return true;
        }
        fired = true;
        false
    });
    Ok(())
}

fn is_interrupt(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some("9") || db.message().contains("interrupted")
        }
        _ => false,
    }
}
