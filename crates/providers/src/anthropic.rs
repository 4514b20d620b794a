//! Adapter for the Anthropic Messages API.
//!
//! Authentication goes in `x-api-key` alongside a pinned `anthropic-version`.
//! System text travels in the top-level `system` field, and tool traffic is
//! expressed as `tool_use` / `tool_result` content blocks.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stockchat_core::error::ProviderError;
use stockchat_core::message::{Message, Role, ToolCallRequest};
use stockchat_core::provider::*;
use stockchat_core::tool::ToolDefinition;
use tracing::{debug, info};

use crate::http;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const REFUSAL_PLACEHOLDER: &str = "The model declined to answer this request.";

/// Backend speaking the Anthropic Messages wire format.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client: http::build_client(timeout)?,
        })
    }

    /// Point the adapter at another host (a proxy or a local test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url
            .into()
            .trim_end_matches('/')
            .trim_end_matches("/v1")
            .to_string();
        self
    }

    /// Split system text out of the transcript; it is sent separately.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Encode the transcript as Messages API turns.
    ///
    /// Consecutive tool results become one user turn holding several
    /// `tool_result` blocks, matching the assistant turn that requested them.
    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => {
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Text(msg.content.clone()),
                    });
                }
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        result.push(AnthropicMessage {
                            role: "assistant".into(),
                            content: AnthropicContent::Text(msg.content.clone()),
                        });
                    } else {
                        let mut blocks: Vec<ContentBlock> = Vec::new();
                        if !msg.content.is_empty() {
                            blocks.push(ContentBlock::Text {
                                text: msg.content.clone(),
                            });
                        }
                        for tc in &msg.tool_calls {
                            blocks.push(ContentBlock::ToolUse {
                                id: tc.id.clone(),
                                name: tc.name.clone(),
                                input: tool_input(&tc.arguments),
                            });
                        }
                        result.push(AnthropicMessage {
                            role: "assistant".into(),
                            content: AnthropicContent::Blocks(blocks),
                        });
                    }
                }
                Role::Tool => {
                    let block = ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                    };
                    match result.last_mut() {
                        Some(AnthropicMessage {
                            role,
                            content: AnthropicContent::Blocks(blocks),
                        }) if role == "user"
                            && blocks
                                .iter()
                                .all(|b| matches!(b, ContentBlock::ToolResult { .. })) =>
                        {
                            blocks.push(block);
                        }
                        _ => result.push(AnthropicMessage {
                            role: "user".into(),
                            content: AnthropicContent::Blocks(vec![block]),
                        }),
                    }
                }
                Role::System => {} // handled separately
            }
        }

        result
    }

    /// Tool catalogue in `input_schema` form.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.json_schema(),
            })
            .collect()
    }

    fn normalize(resp: AnthropicResponse) -> std::result::Result<NormalizedResponse, ProviderError> {
        let mut text_content = String::new();
        let mut tool_calls = Vec::new();

        for block in resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text_content.is_empty() {
                        text_content.push('\n');
                    }
                    text_content.push_str(&text);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    let id = if id.is_empty() {
                        ToolCallRequest::synthesize_id()
                    } else {
                        id
                    };
                    tool_calls.push(ToolCallRequest::new(id, name, input));
                }
                ResponseContentBlock::Other => {}
            }
        }

        if resp.stop_reason.as_deref() == Some("refusal") && text_content.trim().is_empty() {
            info!(provider = "anthropic", "Model refused the request");
            text_content = REFUSAL_PLACEHOLDER.into();
        }

        let usage = resp.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });

        Ok(NormalizedResponse::from_parts(Some(text_content), tool_calls)?
            .with_usage(usage)
            .with_model(resp.model))
    }
}

/// `tool_use.input` must be an object.
fn tool_input(arguments: &serde_json::Value) -> serde_json::Value {
    match arguments {
        serde_json::Value::Object(_) => arguments.clone(),
        serde_json::Value::String(raw) => match serde_json::from_str(raw) {
            Ok(v @ serde_json::Value::Object(_)) => v,
            _ => serde_json::json!({}),
        },
        _ => serde_json::json!({}),
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<NormalizedResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let (system, messages) = Self::extract_system(&request.messages);
        let api_messages = Self::to_api_messages(&messages);

        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": api_messages,
            "max_tokens": max_tokens,
            "temperature": request.temperature,
        });

        if let Some(ref sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(http::send_error)?;

        let response = http::check_status(&self.name, response).await?;
        let api_resp: AnthropicResponse = http::decode_json(response).await?;
        Self::normalize(api_resp)
    }
}

// Wire types

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ResponseContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    /// Thinking and server-side blocks carry nothing we forward
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock;
    use serde_json::json;

    fn parse(body: &str) -> std::result::Result<NormalizedResponse, ProviderError> {
        let resp: AnthropicResponse = serde_json::from_str(body).unwrap();
        AnthropicProvider::normalize(resp)
    }

    #[test]
    fn system_messages_are_lifted() {
        let messages = vec![
            Message::system("You are a stock analyst"),
            Message::system("Answer in Chinese"),
            Message::user("PE of 600000?"),
        ];
        let (system, rest) = AnthropicProvider::extract_system(&messages);
        assert_eq!(
            system.as_deref(),
            Some("You are a stock analyst\n\nAnswer in Chinese")
        );
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn consecutive_tool_results_share_one_user_turn() {
        let messages = vec![
            Message::user("compare"),
            Message::assistant_tool_calls(
                "Let me look.",
                vec![
                    ToolCallRequest::new("toolu_1", "get_stock_detail", json!({"code": "600000"})),
                    ToolCallRequest::new("toolu_2", "get_stock_detail", json!({"code": "000001"})),
                ],
            ),
            Message::tool_result("toolu_1", "{}"),
            Message::tool_result("toolu_2", "{}"),
        ];
        let refs: Vec<&Message> = messages.iter().collect();
        let api = AnthropicProvider::to_api_messages(&refs);
        assert_eq!(api.len(), 3);
        assert_eq!(api[2].role, "user");

        let encoded = serde_json::to_value(&api[2]).unwrap();
        let blocks = encoded["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["type"], "tool_result");
        assert_eq!(blocks[0]["tool_use_id"], "toolu_1");
        assert_eq!(blocks[1]["tool_use_id"], "toolu_2");

        let assistant = serde_json::to_value(&api[1]).unwrap();
        assert_eq!(assistant["content"][0]["type"], "text");
        assert_eq!(assistant["content"][1]["type"], "tool_use");
        assert_eq!(assistant["content"][1]["input"]["code"], "600000");
    }

    #[test]
    fn tool_definitions_use_input_schema() {
        let tools = vec![ToolDefinition {
            name: "get_database_stats".into(),
            description: "Dataset counts".into(),
            parameters: vec![],
        }];
        let api = AnthropicProvider::to_api_tools(&tools);
        assert_eq!(api[0].input_schema["type"], "object");
    }

    #[test]
    fn parse_text_and_tool_use() {
        let resp = parse(
            r#"{"id":"msg_1","model":"claude-sonnet-4-20250514","stop_reason":"tool_use",
                "content":[
                    {"type":"text","text":"Checking the data."},
                    {"type":"tool_use","id":"toolu_1","name":"search_stock","input":{"keyword":"银行"}}
                ],
                "usage":{"input_tokens":20,"output_tokens":7}}"#,
        )
        .unwrap();
        assert_eq!(resp.content.as_deref(), Some("Checking the data."));
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "toolu_1");
        assert_eq!(resp.tool_calls[0].arguments["keyword"], "银行");
        assert_eq!(resp.usage.unwrap().total_tokens, 27);
    }

    #[test]
    fn thinking_blocks_are_ignored() {
        let resp = parse(
            r#"{"model":"m","content":[
                {"type":"thinking","thinking":"hmm","signature":"x"},
                {"type":"text","text":"Done"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(resp.content.as_deref(), Some("Done"));
    }

    #[test]
    fn refusal_without_text_gets_placeholder() {
        let resp = parse(r#"{"model":"m","stop_reason":"refusal","content":[]}"#).unwrap();
        assert_eq!(resp.content.as_deref(), Some(REFUSAL_PLACEHOLDER));
    }

    #[test]
    fn empty_content_is_error() {
        let err = parse(r#"{"model":"m","stop_reason":"end_turn","content":[]}"#).unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse));
    }

    #[tokio::test]
    async fn forbidden_maps_to_auth_error() {
        let base = mock::serve_once(403, r#"{"type":"error"}"#).await;
        let provider = AnthropicProvider::new("bad", Duration::from_secs(5))
            .unwrap()
            .with_base_url(base);
        let request = ProviderRequest {
            model: "claude-sonnet-4-20250514".into(),
            messages: vec![Message::user("hi")],
            tools: vec![],
            temperature: 0.2,
            max_tokens: None,
        };
        let err = provider.complete(request).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn server_error_maps_to_api_error() {
        let base = mock::serve_once(529, r#"{"type":"error","error":{"type":"overloaded_error"}}"#).await;
        let provider = AnthropicProvider::new("key", Duration::from_secs(5))
            .unwrap()
            .with_base_url(base);
        let request = ProviderRequest {
            model: "claude-sonnet-4-20250514".into(),
            messages: vec![Message::user("hi")],
            tools: vec![],
            temperature: 0.2,
            max_tokens: None,
        };
        let err = provider.complete(request).await.unwrap_err();
        match err {
            ProviderError::ApiError { status_code, ref message } => {
                assert_eq!(status_code, 529);
                assert!(message.contains("overloaded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_retryable());
    }
}
