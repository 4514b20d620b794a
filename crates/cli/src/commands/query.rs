//! `stockchat query`: run the guarded SQL tool without a model.

use std::path::Path;

use serde_json::json;
use stockchat_core::message::ToolCallRequest;

use super::{CliResult, build_registry, load_config, open_store};

pub async fn run(config_path: Option<&Path>, sql: &str) -> CliResult {
    let config = load_config(config_path)?;
    let registry = build_registry(open_store(&config).await?, &config);

    let call = ToolCallRequest::new(
        ToolCallRequest::synthesize_id(),
        "execute_sql_query",
        json!({ "sql": sql }),
    );
    let result = registry.dispatch(&call).await;

    if result.is_error {
        return Err(result.to_message_content().into());
    }
    println!("{}", serde_json::to_string_pretty(&result.content)?);
    Ok(())
}
