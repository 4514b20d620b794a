//! Adapter for `/v1/chat/completions` endpoints with function calling.
//!
//! Besides OpenAI itself this covers hosted and self-hosted servers that
//! mirror the same schema (DeepSeek, vLLM, llama.cpp server).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stockchat_core::error::ProviderError;
use stockchat_core::message::{Message, Role, ToolCallRequest};
use stockchat_core::provider::*;
use stockchat_core::tool::ToolDefinition;
use tracing::debug;

use crate::http;

/// Backend speaking the chat-completions wire format.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: http::build_client(timeout)?,
        })
    }

    /// The public OpenAI endpoint.
    pub fn openai(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key, timeout)
    }

    /// Encode the transcript as chat-completions messages.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| {
                let tool_calls: Vec<ApiToolCall> = m
                    .tool_calls
                    .iter()
                    .map(|tc| ApiToolCall {
                        id: Some(tc.id.clone()),
                        r#type: "function".into(),
                        function: ApiFunction {
                            name: tc.name.clone(),
                            arguments: encode_arguments(&tc.arguments),
                        },
                    })
                    .collect();

                // Assistant turns that only call tools carry null content
                let content = if m.content.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(m.content.clone())
                };

                ApiMessage {
                    role: match m.role {
                        Role::User => "user".into(),
                        Role::Assistant => "assistant".into(),
                        Role::System => "system".into(),
                        Role::Tool => "tool".into(),
                    },
                    content,
                    refusal: None,
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: m.tool_call_id.clone(),
                }
            })
            .collect()
    }

    /// Tool catalogue as `function` entries.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.json_schema(),
                },
            })
            .collect()
    }

    /// Decode a chat-completions body into the normalized shape.
    fn normalize(api_response: ApiResponse) -> Result<NormalizedResponse, ProviderError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("No choices in response".into()))?;

        let tool_calls: Vec<ToolCallRequest> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                ToolCallRequest::new(
                    tc.id
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(ToolCallRequest::synthesize_id),
                    tc.function.name,
                    decode_arguments(&tc.function.arguments),
                )
            })
            .collect();

        // A refusal is a normal terminal answer, not an error
        let content = choice.message.content.or(choice.message.refusal);

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(NormalizedResponse::from_parts(content, tool_calls)?
            .with_usage(usage)
            .with_model(api_response.model))
    }
}

/// Arguments travel as a JSON-encoded string on this wire.
fn encode_arguments(arguments: &serde_json::Value) -> String {
    match arguments {
        serde_json::Value::Null => "{}".into(),
        serde_json::Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

/// Parse an arguments string; unparseable text is kept verbatim so the
/// registry can report it back in-band.
fn decode_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<NormalizedResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!("auto");
        }

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(http::send_error)?;

        let response = http::check_status(&self.name, response).await?;
        let api_response: ApiResponse = http::decode_json(response).await?;
        Self::normalize(api_response)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(http::send_error)?;

        Ok(response.status().is_success())
    }
}

// Wire types

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refusal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock;
    use serde_json::json;
    use stockchat_core::tool::{ParamType, ParameterSpec};

    fn parse(body: &str) -> Result<NormalizedResponse, ProviderError> {
        let api: ApiResponse = serde_json::from_str(body).unwrap();
        OpenAiCompatProvider::normalize(api)
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![Message::user("hi")],
            tools: vec![],
            temperature: 0.2,
            max_tokens: None,
        }
    }

    #[test]
    fn openai_constructor() {
        let provider = OpenAiCompatProvider::openai("sk-test", Duration::from_secs(5)).unwrap();
        assert_eq!(provider.name(), "openai");
        assert!(provider.base_url.contains("api.openai.com"));
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let msg = Message::assistant_tool_calls(
            "",
            vec![ToolCallRequest::new("call_1", "search_stock", json!({"keyword": "银行"}))],
        );
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        assert!(api_msgs[0].content.is_none());
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc[0].function.name, "search_stock");
        let args: serde_json::Value = serde_json::from_str(&tc[0].function.arguments).unwrap();
        assert_eq!(args["keyword"], "银行");
    }

    #[test]
    fn message_conversion_tool_response() {
        let msg = Message::tool_result("call_1", "result data");
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "get_stock_detail".into(),
            description: "Look up one stock".into(),
            parameters: vec![ParameterSpec::required("code", ParamType::String, "Stock code")],
        }];
        let api_tools = OpenAiCompatProvider::to_api_tools(&tools);
        assert_eq!(api_tools.len(), 1);
        assert_eq!(api_tools[0].r#type, "function");
        assert_eq!(api_tools[0].function.parameters["required"], json!(["code"]));
    }

    #[test]
    fn parse_text_answer() {
        let resp = parse(
            r#"{"model":"gpt-4o-mini","choices":[{"message":{"role":"assistant","content":"PE is 5.2"}}],
                "usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        )
        .unwrap();
        assert_eq!(resp.content.as_deref(), Some("PE is 5.2"));
        assert!(!resp.has_tool_calls());
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn parse_tool_calls_in_order() {
        let resp = parse(
            r#"{"model":"m","choices":[{"message":{"role":"assistant","content":null,"tool_calls":[
                {"id":"call_a","type":"function","function":{"name":"search_stock","arguments":"{\"keyword\":\"600000\"}"}},
                {"id":"call_b","type":"function","function":{"name":"get_database_stats","arguments":""}}
            ]}}]}"#,
        )
        .unwrap();
        assert!(resp.content.is_none());
        assert_eq!(resp.tool_calls.len(), 2);
        assert_eq!(resp.tool_calls[0].id, "call_a");
        assert_eq!(resp.tool_calls[0].arguments["keyword"], "600000");
        assert_eq!(resp.tool_calls[1].arguments, json!({}));
    }

    #[test]
    fn invalid_argument_json_is_kept_verbatim() {
        let resp = parse(
            r#"{"choices":[{"message":{"role":"assistant","tool_calls":[
                {"id":"call_a","type":"function","function":{"name":"search_stock","arguments":"{not json"}}
            ]}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.tool_calls[0].arguments, json!("{not json"));
    }

    #[test]
    fn missing_call_id_is_synthesized() {
        let resp = parse(
            r#"{"choices":[{"message":{"role":"assistant","tool_calls":[
                {"function":{"name":"get_database_stats","arguments":"{}"}}
            ]}}]}"#,
        )
        .unwrap();
        assert!(resp.tool_calls[0].id.starts_with("call_"));
    }

    #[test]
    fn refusal_becomes_content() {
        let resp = parse(
            r#"{"choices":[{"message":{"role":"assistant","content":null,"refusal":"I can't help with that."}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.content.as_deref(), Some("I can't help with that."));
    }

    #[test]
    fn empty_message_is_error() {
        let err = parse(r#"{"choices":[{"message":{"role":"assistant","content":""}}]}"#).unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse));

        let err = parse(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_error() {
        let base = mock::serve_once(401, r#"{"error":{"message":"bad key"}}"#).await;
        let provider = OpenAiCompatProvider::new("openai", base, "sk-bad", Duration::from_secs(5)).unwrap();
        let err = provider.complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn rate_limit_maps_to_rate_limited() {
        let base = mock::serve_once(429, r#"{"error":"slow down"}"#).await;
        let provider = OpenAiCompatProvider::new("openai", base, "sk", Duration::from_secs(5)).unwrap();
        let err = provider.complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn successful_round_trip() {
        let base = mock::serve_once(
            200,
            r#"{"model":"gpt-4o-mini","choices":[{"message":{"role":"assistant","content":"hello"}}]}"#,
        )
        .await;
        let provider = OpenAiCompatProvider::new("openai", base, "sk", Duration::from_secs(5)).unwrap();
        let resp = provider.complete(request()).await.unwrap();
        assert_eq!(resp.content.as_deref(), Some("hello"));
        assert_eq!(resp.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        let base = mock::refused_url().await;
        let provider = OpenAiCompatProvider::new("openai", base, "sk", Duration::from_secs(5)).unwrap();
        let err = provider.complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
        assert!(err.is_retryable());
    }
}
