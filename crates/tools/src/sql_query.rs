//! `execute_sql_query`: guarded ad-hoc read queries.
//!
//! The query passes [`SqlGuard`], runs on the store's read-only handle under
//! a timeout, and every cell is converted to a JSON-native value. A cell
//! that cannot be represented degrades to a string; it never fails the row.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value, json};
use stockchat_core::error::{StoreError, ToolError};
use stockchat_core::store::{SqlValue, StockStore};
use stockchat_core::tool::{ParamType, ParameterSpec, Tool, ToolArgs};
use tracing::{debug, warn};

use crate::sql_guard::SqlGuard;

const DEFAULT_MAX_ERROR_CHARS: usize = 300;

/// Slack past the engine deadline before the call itself is abandoned.
const BACKSTOP_GRACE: Duration = Duration::from_secs(1);

pub struct SqlQueryTool {
    store: Arc<dyn StockStore>,
    guard: SqlGuard,
    timeout: Duration,
    max_error_chars: usize,
}

impl SqlQueryTool {
    pub fn new(store: Arc<dyn StockStore>, guard: SqlGuard, timeout: Duration) -> Self {
        Self {
            store,
            guard,
            timeout,
            max_error_chars: DEFAULT_MAX_ERROR_CHARS,
        }
    }

    pub fn with_max_error_chars(mut self, max_error_chars: usize) -> Self {
        self.max_error_chars = max_error_chars;
        self
    }

    /// First line of the engine message, cut to `max_error_chars`.
    fn engine_message(&self, err: &StoreError) -> String {
        let full = match err {
            StoreError::QueryFailed(msg) => msg.clone(),
            other => other.to_string(),
        };
        let first_line = full.lines().next().unwrap_or_default().trim();
        match first_line.char_indices().nth(self.max_error_chars) {
            Some((cut, _)) => format!("{}...", &first_line[..cut]),
            None => first_line.to_string(),
        }
    }

    fn timeout_error(&self) -> ToolError {
        ToolError::Timeout {
            tool_name: self.name().to_string(),
            timeout_secs: self.timeout.as_secs(),
        }
    }
}

/// Convert one decoded cell into JSON.
fn cell_to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        // NaN and infinities have no JSON number form
        SqlValue::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(bytes) => Value::String(format!("base64:{}", STANDARD.encode(bytes))),
        SqlValue::Undecodable { type_name, reason } => {
            Value::String(format!("<undecodable {type_name}: {reason}>"))
        }
    }
}

/// Make column names usable as object keys: `code, code` becomes `code, code_2`.
fn unique_columns(columns: &[String]) -> Vec<String> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    columns
        .iter()
        .map(|name| {
            let count = seen.entry(name.as_str()).or_insert(0);
            *count += 1;
            if *count == 1 {
                name.clone()
            } else {
                format!("{name}_{count}")
            }
        })
        .collect()
}

#[async_trait]
impl Tool for SqlQueryTool {
    fn name(&self) -> &str {
        "execute_sql_query"
    }

    fn description(&self) -> &str {
        "Run a read-only SQL SELECT against the stock database. Tables: stocks(code, name, market, industry, list_date, total_assets, net_assets, pe_ratio, pb_ratio, roe, total_market_cap, circulating_market_cap, turnover_rate, updated_at) and stock_daily(code, trade_date, open, close, high, low, volume, amount, change, pct_change, turnover_rate). Only single SELECT statements are allowed; a LIMIT is added when missing."
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::required(
            "sql",
            ParamType::String,
            &format!(
                "A single SELECT statement. LIMIT may not exceed {}",
                self.guard.max_limit()
            ),
        )]
    }

    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let query = self.guard.validate(args.require_str("sql")?)?;
        debug!(
            tool = "execute_sql_query",
            limit = query.limit,
            limit_injected = query.limit_injected,
            "Running guarded query"
        );

        // The store stops the statement at `self.timeout`; this only guards
        // against a store that never returns.
        let pending = self.store.run_read_query(&query.sql, self.timeout);
        let output = match tokio::time::timeout(self.timeout + BACKSTOP_GRACE, pending).await {
            Err(_) => {
                warn!(tool = "execute_sql_query", timeout_secs = self.timeout.as_secs(), "Store ignored the query deadline");
                return Err(self.timeout_error());
            }
            Ok(Err(StoreError::Timeout(_))) => {
                warn!(tool = "execute_sql_query", timeout_secs = self.timeout.as_secs(), "Query timed out");
                return Err(self.timeout_error());
            }
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: self.name().to_string(),
                    reason: self.engine_message(&e),
                });
            }
            Ok(Ok(output)) => output,
        };

        let columns = unique_columns(&output.columns);
        let rows: Vec<Value> = output
            .rows
            .into_iter()
            .map(|row| {
                let map: Map<String, Value> = columns
                    .iter()
                    .cloned()
                    .zip(row.into_iter().map(cell_to_json))
                    .collect();
                Value::Object(map)
            })
            .collect();

        Ok(json!({
            "columns": columns,
            "row_count": rows.len(),
            "rows": rows,
            "limit": query.limit,
            "limit_injected": query.limit_injected,
        }))
    }
}
