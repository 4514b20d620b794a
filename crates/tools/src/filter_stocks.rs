//! `filter_stocks`: screen stocks by valuation bounds and industry.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use stockchat_core::error::ToolError;
use stockchat_core::store::{StockFilter, StockStore};
use stockchat_core::tool::{ParamType, ParameterSpec, Tool, ToolArgs};
use tracing::debug;

use crate::{clamp_count, stock_summary, store_failure};

const BOUNDS: [(&str, &str); 6] = [
    ("min_pe", "Minimum PE ratio"),
    ("max_pe", "Maximum PE ratio"),
    ("min_pb", "Minimum PB ratio"),
    ("max_pb", "Maximum PB ratio"),
    ("min_market_cap", "Minimum total market cap (100M CNY)"),
    ("max_market_cap", "Maximum total market cap (100M CNY)"),
];

pub struct FilterStocksTool {
    store: Arc<dyn StockStore>,
    default_limit: u32,
    max_limit: u32,
}

impl FilterStocksTool {
    pub fn new(store: Arc<dyn StockStore>, default_limit: u32, max_limit: u32) -> Self {
        Self {
            store,
            default_limit,
            max_limit,
        }
    }

    fn build_filter(&self, args: &ToolArgs) -> StockFilter {
        let mut filter = StockFilter::with_limit(clamp_count(
            args.i64("limit"),
            self.default_limit,
            self.max_limit,
        ));
        filter.min_pe = args.f64("min_pe");
        filter.max_pe = args.f64("max_pe");
        filter.min_pb = args.f64("min_pb");
        filter.max_pb = args.f64("max_pb");
        filter.min_market_cap = args.f64("min_market_cap");
        filter.max_market_cap = args.f64("max_market_cap");
        filter.industry = args
            .str("industry")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        filter
    }
}

/// The filters that actually constrained the result.
fn applied_filters(filter: &StockFilter) -> Value {
    let mut applied = Map::new();
    let bounds = [
        ("min_pe", filter.min_pe),
        ("max_pe", filter.max_pe),
        ("min_pb", filter.min_pb),
        ("max_pb", filter.max_pb),
        ("min_market_cap", filter.min_market_cap),
        ("max_market_cap", filter.max_market_cap),
    ];
    for (name, value) in bounds {
        if let Some(v) = value {
            applied.insert(name.into(), json!(v));
        }
    }
    if let Some(industry) = &filter.industry {
        applied.insert("industry".into(), json!(industry));
    }
    Value::Object(applied)
}

#[async_trait]
impl Tool for FilterStocksTool {
    fn name(&self) -> &str {
        "filter_stocks"
    }

    fn description(&self) -> &str {
        "Screen stocks by PE, PB, market cap range and industry. All filters are optional; results are ordered by market cap, largest first."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        let mut params: Vec<ParameterSpec> = BOUNDS
            .iter()
            .map(|(name, desc)| ParameterSpec::optional(name, ParamType::Number, desc))
            .collect();
        params.push(ParameterSpec::optional(
            "industry",
            ParamType::String,
            "Industry name or fragment, e.g. '银行'",
        ));
        params.push(
            ParameterSpec::optional(
                "limit",
                ParamType::Integer,
                &format!("Maximum number of results (1-{})", self.max_limit),
            )
            .with_default(json!(self.default_limit)),
        );
        params
    }

    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let filter = self.build_filter(&args);

        let stocks = self
            .store
            .filter_stocks(&filter)
            .await
            .map_err(|e| store_failure(self.name(), e))?;

        debug!(tool = "filter_stocks", matches = stocks.len(), limit = filter.limit, "Filter complete");
        Ok(json!({
            "filters": applied_filters(&filter),
            "limit": filter.limit,
            "count": stocks.len(),
            "results": stocks.iter().map(stock_summary).collect::<Vec<_>>(),
        }))
    }
}
