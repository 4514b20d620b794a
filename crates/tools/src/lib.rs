//! Stock tools for stockchat.
//!
//! Every tool reads through a shared [`StockStore`] and returns JSON the
//! model can consume. `execute_sql_query` additionally passes through the
//! [`sql_guard`] allow-list before reaching the store's read-only handle.

pub mod database_stats;
pub mod filter_stocks;
pub mod search_stock;
pub mod sql_guard;
pub mod sql_query;
pub mod stock_detail;
pub mod stock_history;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use stockchat_config::AppConfig;
use stockchat_core::error::{StoreError, ToolError};
use stockchat_core::store::{Stock, StockStore};
use stockchat_core::tool::ToolRegistry;

pub use sql_guard::{SqlGuard, ValidatedQuery};

/// Build the registry of stock tools, in the order they are declared to
/// the model.
pub fn stock_registry(store: Arc<dyn StockStore>, config: &AppConfig) -> ToolRegistry {
    let limits = &config.tools;
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(search_stock::SearchStockTool::new(
        Arc::clone(&store),
        limits.search_max_results,
    )));
    registry.register(Box::new(stock_detail::StockDetailTool::new(Arc::clone(&store))));
    registry.register(Box::new(stock_history::StockHistoryTool::new(
        Arc::clone(&store),
        limits.history_default_days,
        limits.history_max_days,
    )));
    registry.register(Box::new(filter_stocks::FilterStocksTool::new(
        Arc::clone(&store),
        limits.filter_default_limit,
        limits.filter_max_limit,
    )));
    registry.register(Box::new(database_stats::DatabaseStatsTool::new(Arc::clone(&store))));
    registry.register(Box::new(
        sql_query::SqlQueryTool::new(
            store,
            SqlGuard::new(config.sql.default_limit, config.sql.max_limit),
            Duration::from_secs(config.database.query_timeout_secs),
        )
        .with_max_error_chars(config.sql.max_error_chars),
    ));
    registry
}

/// Map a data-layer failure into a tool failure.
pub(crate) fn store_failure(tool_name: &str, err: StoreError) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool_name.to_string(),
        reason: err.to_string(),
    }
}

/// The compact shape used for list results.
pub(crate) fn stock_summary(stock: &Stock) -> Value {
    json!({
        "code": stock.code,
        "name": stock.name,
        "market": stock.market,
        "industry": stock.industry,
        "pe_ratio": stock.pe_ratio,
        "pb_ratio": stock.pb_ratio,
        "market_cap": stock.total_market_cap,
        "turnover_rate": stock.turnover_rate,
    })
}

/// Clamp a requested count into `1..=max`.
pub(crate) fn clamp_count(requested: Option<i64>, default: u32, max: u32) -> u32 {
    let max = max.max(1);
    match requested {
        Some(n) => n.clamp(1, i64::from(max)) as u32,
        None => default.clamp(1, max),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::{Days, NaiveDate};
    use stockchat_core::store::DailyRecord;
    use stockchat_store::SqliteStockStore;

    pub struct Fixture {
        pub store: Arc<SqliteStockStore>,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        pub fn dyn_store(&self) -> Arc<dyn StockStore> {
            self.store.clone()
        }
    }

    fn stock(code: &str, name: &str, industry: &str, pe: f64, pb: f64, cap: f64) -> Stock {
        let mut s = Stock::new(code, name);
        s.market = Some(if code.starts_with('6') { "SH" } else { "SZ" }.into());
        s.industry = Some(industry.into());
        s.pe_ratio = Some(pe);
        s.pb_ratio = Some(pb);
        s.total_market_cap = Some(cap);
        s
    }

    /// A store with four stocks and 40 trading days for 600000.
    pub async fn seeded_store() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("stocks.db").display());
        let store = SqliteStockStore::connect(&url, 2).await.unwrap();

        store
            .upsert_stocks(&[
                stock("600000", "浦发银行", "银行", 5.2, 0.4, 2300.0),
                stock("000001", "平安银行", "银行", 4.8, 0.5, 2100.0),
                stock("600519", "贵州茅台", "白酒", 28.0, 9.1, 21000.0),
                stock("300750", "宁德时代", "电池", 22.5, 5.3, 8800.0),
            ])
            .await
            .unwrap();

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let records: Vec<DailyRecord> = (0..40u64)
            .map(|i| {
                let close = 7.0 + i as f64 * 0.01;
                DailyRecord {
                    code: "600000".into(),
                    trade_date: start.checked_add_days(Days::new(i)).unwrap(),
                    open: Some(close - 0.05),
                    close: Some(close),
                    high: Some(close + 0.1),
                    low: Some(close - 0.1),
                    volume: Some(1_000_000 + i as i64),
                    amount: Some(close * 1_000_000.0),
                    change: Some(0.01),
                    pct_change: Some(0.14),
                    turnover_rate: Some(0.3),
                }
            })
            .collect();
        store.upsert_daily(&records).await.unwrap();

        Fixture {
            store: Arc::new(store),
            _dir: dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockchat_core::message::ToolCallRequest;

    #[test]
    fn clamp_count_bounds() {
        assert_eq!(clamp_count(None, 30, 365), 30);
        assert_eq!(clamp_count(Some(0), 30, 365), 1);
        assert_eq!(clamp_count(Some(-5), 30, 365), 1);
        assert_eq!(clamp_count(Some(10_000), 30, 365), 365);
        assert_eq!(clamp_count(None, 0, 0), 1);
    }

    #[tokio::test]
    async fn registry_declares_six_tools_in_order() {
        let fx = test_support::seeded_store().await;
        let registry = stock_registry(fx.dyn_store(), &AppConfig::default());
        assert_eq!(
            registry.names(),
            vec![
                "search_stock",
                "get_stock_detail",
                "get_stock_history",
                "filter_stocks",
                "get_database_stats",
                "execute_sql_query",
            ]
        );
        for def in registry.list_definitions() {
            assert!(!def.description.is_empty(), "{} lacks a description", def.name);
            assert_eq!(def.json_schema()["type"], "object");
        }
    }

    #[tokio::test]
    async fn registry_dispatch_reaches_the_store() {
        let fx = test_support::seeded_store().await;
        let registry = stock_registry(fx.dyn_store(), &AppConfig::default());
        let call = ToolCallRequest::new("call_1", "get_database_stats", Value::Null);
        let result = registry.dispatch(&call).await;
        assert!(!result.is_error);
        assert_eq!(result.content["total_stocks"], 4);
    }
}
