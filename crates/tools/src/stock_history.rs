//! `get_stock_history`: recent daily trading records for one stock.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use stockchat_core::error::ToolError;
use stockchat_core::store::{DailyRecord, StockStore};
use stockchat_core::tool::{ParamType, ParameterSpec, Tool, ToolArgs};
use tracing::debug;

use crate::{clamp_count, store_failure};

pub struct StockHistoryTool {
    store: Arc<dyn StockStore>,
    default_days: u32,
    max_days: u32,
}

impl StockHistoryTool {
    pub fn new(store: Arc<dyn StockStore>, default_days: u32, max_days: u32) -> Self {
        Self {
            store,
            default_days,
            max_days,
        }
    }
}

fn record_json(r: &DailyRecord) -> Value {
    json!({
        "date": r.trade_date.to_string(),
        "open": r.open,
        "close": r.close,
        "high": r.high,
        "low": r.low,
        "volume": r.volume,
        "amount": r.amount,
        "change": r.change,
        "pct_change": r.pct_change,
        "turnover_rate": r.turnover_rate,
    })
}

#[async_trait]
impl Tool for StockHistoryTool {
    fn name(&self) -> &str {
        "get_stock_history"
    }

    fn description(&self) -> &str {
        "Get recent daily trading records (open, close, high, low, volume, amount, change) for a stock, newest first."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required("code", ParamType::String, "Six-digit stock code"),
            ParameterSpec::optional(
                "days",
                ParamType::Integer,
                &format!("Number of most recent trading days (1-{})", self.max_days),
            )
            .with_default(json!(self.default_days)),
        ]
    }

    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let code = args.require_str("code")?.trim();
        let days = clamp_count(args.i64("days"), self.default_days, self.max_days);

        let records = self
            .store
            .daily_history(code, days)
            .await
            .map_err(|e| store_failure(self.name(), e))?;

        debug!(tool = "get_stock_history", code, days, records = records.len(), "History loaded");
        Ok(Value::Array(records.iter().map(record_json).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::seeded_store;
    use stockchat_core::tool::validate_arguments;

    async fn run(tool: &StockHistoryTool, raw: Value) -> Value {
        let args = validate_arguments(&tool.parameters(), &raw).unwrap();
        tool.execute(args).await.unwrap()
    }

    #[tokio::test]
    async fn default_window_is_newest_first() {
        let fx = seeded_store().await;
        let tool = StockHistoryTool::new(fx.dyn_store(), 30, 365);
        let out = run(&tool, json!({"code": "600000"})).await;
        let records = out.as_array().unwrap();
        assert_eq!(records.len(), 30);
        assert_eq!(records[0]["date"], "2024-02-09");
        assert!(records[0]["date"].as_str() > records[1]["date"].as_str());
    }

    #[tokio::test]
    async fn out_of_range_days_are_clamped() {
        let fx = seeded_store().await;
        let tool = StockHistoryTool::new(fx.dyn_store(), 30, 35);
        let out = run(&tool, json!({"code": "600000", "days": 10_000})).await;
        assert_eq!(out.as_array().unwrap().len(), 35);

        let out = run(&tool, json!({"code": "600000", "days": -3})).await;
        assert_eq!(out.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_code_has_no_history() {
        let fx = seeded_store().await;
        let tool = StockHistoryTool::new(fx.dyn_store(), 30, 365);
        assert_eq!(run(&tool, json!({"code": "123456"})).await, json!([]));
    }
}
