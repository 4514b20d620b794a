//! `get_database_stats`: aggregate counts over the dataset.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use stockchat_core::error::ToolError;
use stockchat_core::store::StockStore;
use stockchat_core::tool::{ParameterSpec, Tool, ToolArgs};

use crate::store_failure;

pub struct DatabaseStatsTool {
    store: Arc<dyn StockStore>,
}

impl DatabaseStatsTool {
    pub fn new(store: Arc<dyn StockStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for DatabaseStatsTool {
    fn name(&self) -> &str {
        "get_database_stats"
    }

    fn description(&self) -> &str {
        "Get database statistics: number of stocks, number of daily records and the latest trade date."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        Vec::new()
    }

    async fn execute(&self, _args: ToolArgs) -> Result<Value, ToolError> {
        let stats = self
            .store
            .stats()
            .await
            .map_err(|e| store_failure(self.name(), e))?;

        Ok(json!({
            "total_stocks": stats.total_stocks,
            "total_daily_records": stats.total_daily_records,
            "latest_trade_date": stats.latest_trade_date.map(|d| d.to_string()),
        }))
    }
}
