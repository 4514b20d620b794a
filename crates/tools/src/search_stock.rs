//! `search_stock`: find stocks by code or name fragment.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use stockchat_core::error::ToolError;
use stockchat_core::store::StockStore;
use stockchat_core::tool::{ParamType, ParameterSpec, Tool, ToolArgs};
use tracing::debug;

use crate::{clamp_count, stock_summary, store_failure};

const DEFAULT_RESULTS: u32 = 10;

pub struct SearchStockTool {
    store: Arc<dyn StockStore>,
    max_results: u32,
}

impl SearchStockTool {
    pub fn new(store: Arc<dyn StockStore>, max_results: u32) -> Self {
        Self { store, max_results }
    }
}

#[async_trait]
impl Tool for SearchStockTool {
    fn name(&self) -> &str {
        "search_stock"
    }

    fn description(&self) -> &str {
        "Search stocks by code or name. Returns matching stocks with code, name, market, industry and key valuation metrics."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required(
                "keyword",
                ParamType::String,
                "Stock code or part of the company name, e.g. '600000' or '银行'",
            ),
            ParameterSpec::optional("limit", ParamType::Integer, "Maximum number of matches")
                .with_default(json!(DEFAULT_RESULTS)),
        ]
    }

    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let keyword = args.require_str("keyword")?.trim();
        if keyword.is_empty() {
            return Err(ToolError::InvalidArguments("keyword must not be empty".into()));
        }
        let limit = clamp_count(args.i64("limit"), DEFAULT_RESULTS, self.max_results);

        let matches = self
            .store
            .search_stocks(keyword, limit)
            .await
            .map_err(|e| store_failure(self.name(), e))?;

        debug!(tool = "search_stock", keyword, matches = matches.len(), "Search complete");
        Ok(Value::Array(matches.iter().map(stock_summary).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::seeded_store;
    use stockchat_core::tool::validate_arguments;

    async fn run(tool: &SearchStockTool, raw: Value) -> Result<Value, ToolError> {
        let args = validate_arguments(&tool.parameters(), &raw)?;
        tool.execute(args).await
    }

    #[tokio::test]
    async fn finds_by_name_fragment() {
        let fx = seeded_store().await;
        let tool = SearchStockTool::new(fx.dyn_store(), 50);
        let out = run(&tool, json!({"keyword": "银行"})).await.unwrap();
        let codes: Vec<&str> = out
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["code"].as_str().unwrap())
            .collect();
        assert_eq!(codes, vec!["000001", "600000"]);
        assert_eq!(out[0]["industry"], "银行");
    }

    #[tokio::test]
    async fn no_match_is_an_empty_list() {
        let fx = seeded_store().await;
        let tool = SearchStockTool::new(fx.dyn_store(), 50);
        let out = run(&tool, json!({"keyword": "不存在"})).await.unwrap();
        assert_eq!(out, json!([]));
    }

    #[tokio::test]
    async fn limit_is_clamped_to_max() {
        let fx = seeded_store().await;
        let tool = SearchStockTool::new(fx.dyn_store(), 1);
        let out = run(&tool, json!({"keyword": "0", "limit": 100})).await.unwrap();
        assert_eq!(out.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn blank_keyword_is_invalid() {
        let fx = seeded_store().await;
        let tool = SearchStockTool::new(fx.dyn_store(), 50);
        let err = run(&tool, json!({"keyword": "  "})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
