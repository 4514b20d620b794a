//! Recovery of tool calls that a model wrote as plain text.
//!
//! Smaller local models sometimes answer with the call itself instead of a
//! structured `tool_calls` entry:
//!
//! ```text
//! <tool_call>{"name": "search_stock", "arguments": {"keyword": "银行"}}</tool_call>
//! ```
//!
//! or inside a fenced ```json block, or as a bare JSON object. A candidate is
//! accepted only if its `name` matches a declared tool.

use serde_json::Value;
use stockchat_core::message::ToolCallRequest;
use stockchat_core::tool::ToolDefinition;

const OPEN_TAG: &str = "<tool_call>";
const CLOSE_TAG: &str = "</tool_call>";

/// Extract tool calls from free text; empty when nothing usable is found.
pub fn recover_tool_calls(text: &str, declared: &[ToolDefinition]) -> Vec<ToolCallRequest> {
    let mut calls = Vec::new();
    for candidate in candidates(text) {
        let Ok(value) = serde_json::from_str::<Value>(candidate.trim()) else {
            continue;
        };
        match value {
            Value::Array(items) => {
                calls.extend(items.iter().filter_map(|item| to_call(item, declared)));
            }
            other => calls.extend(to_call(&other, declared)),
        }
    }
    calls
}

/// JSON snippets worth trying, most explicit encoding first.
fn candidates(text: &str) -> Vec<&str> {
    let tagged = between(text, OPEN_TAG, CLOSE_TAG);
    if !tagged.is_empty() {
        return tagged;
    }

    let fenced = fenced_blocks(text);
    if !fenced.is_empty() {
        return fenced;
    }

    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        vec![trimmed]
    } else {
        Vec::new()
    }
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(open) {
        let after = &rest[start + open.len()..];
        match after.find(close) {
            Some(end) => {
                out.push(&after[..end]);
                rest = &after[end + close.len()..];
            }
            // Unterminated final tag: take the remainder
            None => {
                out.push(after);
                break;
            }
        }
    }
    out
}

fn fenced_blocks(text: &str) -> Vec<&str> {
    between(text, "```", "```")
        .into_iter()
        .map(|block| {
            // Drop the info string ("json", "tool_call", ...)
            match block.find('\n') {
                Some(nl) if !block[..nl].trim_start().starts_with('{') => &block[nl + 1..],
                _ => block,
            }
        })
        .collect()
}

fn to_call(value: &Value, declared: &[ToolDefinition]) -> Option<ToolCallRequest> {
    let obj = value.as_object()?;
    // Some models wrap the call the way the OpenAI wire does
    let obj = match obj.get("function").and_then(Value::as_object) {
        Some(inner) if inner.contains_key("name") => inner,
        _ => obj,
    };

    let name = obj.get("name")?.as_str()?;
    if !declared.iter().any(|d| d.name == name) {
        return None;
    }

    let arguments = match obj.get("arguments").or_else(|| obj.get("parameters")) {
        None | Some(Value::Null) => serde_json::json!({}),
        Some(Value::String(raw)) => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
        }
        Some(other) => other.clone(),
    };

    Some(ToolCallRequest::new(
        ToolCallRequest::synthesize_id(),
        name,
        arguments,
    ))
}
