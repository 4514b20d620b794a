//! `get_stock_detail`: the full record for one stock code.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use stockchat_core::error::ToolError;
use stockchat_core::store::StockStore;
use stockchat_core::tool::{ParamType, ParameterSpec, Tool, ToolArgs};

use crate::store_failure;

pub struct StockDetailTool {
    store: Arc<dyn StockStore>,
}

impl StockDetailTool {
    pub fn new(store: Arc<dyn StockStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for StockDetailTool {
    fn name(&self) -> &str {
        "get_stock_detail"
    }

    fn description(&self) -> &str {
        "Get detailed information for one stock: market, industry, listing date, PE, PB, ROE, market cap, turnover rate and assets."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::required(
            "code",
            ParamType::String,
            "Six-digit stock code, e.g. '600000'",
        )]
    }

    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let code = args.require_str("code")?.trim();

        let stock = self
            .store
            .get_stock(code)
            .await
            .map_err(|e| store_failure(self.name(), e))?;

        // Not found is an answer, not a failure
        let Some(stock) = stock else {
            return Ok(json!({
                "found": false,
                "code": code,
                "message": format!("No stock found with code {code}"),
            }));
        };

        let mut detail = serde_json::to_value(&stock).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().to_string(),
            reason: e.to_string(),
        })?;
        if let Value::Object(map) = &mut detail {
            map.insert("found".into(), Value::Bool(true));
        }
        Ok(detail)
    }
}
