//! Ollama native provider implementation.
//!
//! Talks to Ollama's own `/api/chat` endpoint with `stream: false`. Tool
//! calls on this wire carry no ids, so ids are synthesized here; calls a
//! model writes as text are recovered via [`crate::tool_text`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stockchat_core::error::ProviderError;
use stockchat_core::message::{Message, Role, ToolCallRequest};
use stockchat_core::provider::*;
use stockchat_core::tool::ToolDefinition;
use tracing::debug;

use crate::{http, tool_text};

pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";

/// Ollama native chat provider.
pub struct OllamaProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider for the Ollama server at `host`.
    pub fn new(host: Option<&str>, timeout: Duration) -> Result<Self, ProviderError> {
        let host = host.unwrap_or(DEFAULT_OLLAMA_HOST).trim().trim_end_matches('/');
        // Tolerate an OpenAI-style base URL
        let host = host.strip_suffix("/v1").unwrap_or(host);
        Ok(Self {
            name: "ollama".into(),
            base_url: host.to_string(),
            api_key: None,
            client: http::build_client(timeout)?,
        })
    }

    /// Send a bearer token (for Ollama behind an authenticating proxy).
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    fn to_api_messages(messages: &[Message]) -> Vec<OllamaMessage> {
        // Tool results on this wire are matched by tool name, not id
        let mut names_by_id: HashMap<&str, &str> = HashMap::new();
        let mut result = Vec::with_capacity(messages.len());

        for m in messages {
            for tc in &m.tool_calls {
                names_by_id.insert(tc.id.as_str(), tc.name.as_str());
            }

            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };

            let tool_calls: Vec<OllamaToolCall> = m
                .tool_calls
                .iter()
                .map(|tc| OllamaToolCall {
                    function: OllamaFunction {
                        name: tc.name.clone(),
                        arguments: object_arguments(&tc.arguments),
                    },
                })
                .collect();

            let tool_name = m
                .tool_call_id
                .as_deref()
                .and_then(|id| names_by_id.get(id))
                .map(|name| name.to_string());

            result.push(OllamaMessage {
                role: role.into(),
                content: m.content.clone(),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_name,
            });
        }

        result
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.json_schema(),
                    }
                })
            })
            .collect()
    }

    fn normalize(
        resp: OllamaResponse,
        declared: &[ToolDefinition],
    ) -> std::result::Result<NormalizedResponse, ProviderError> {
        let message = resp
            .message
            .ok_or_else(|| ProviderError::MalformedResponse("No message in response".into()))?;

        let mut tool_calls: Vec<ToolCallRequest> = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                ToolCallRequest::new(
                    ToolCallRequest::synthesize_id(),
                    tc.function.name,
                    tc.function.arguments,
                )
            })
            .collect();

        let mut content = Some(message.content);
        if tool_calls.is_empty() {
            let text = content.as_deref().unwrap_or_default();
            let recovered = tool_text::recover_tool_calls(text, declared);
            if !recovered.is_empty() {
                debug!(provider = "ollama", count = recovered.len(), "Recovered tool calls from text");
                tool_calls = recovered;
                content = None;
            }
        }

        let usage = match (resp.prompt_eval_count, resp.eval_count) {
            (None, None) => None,
            (prompt, completion) => {
                let prompt = prompt.unwrap_or(0);
                let completion = completion.unwrap_or(0);
                Some(Usage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: prompt + completion,
                })
            }
        };

        Ok(NormalizedResponse::from_parts(content, tool_calls)?
            .with_usage(usage)
            .with_model(resp.model))
    }
}

/// Ollama wants arguments as a JSON object, not an encoded string.
fn object_arguments(arguments: &serde_json::Value) -> serde_json::Value {
    match arguments {
        serde_json::Value::Object(_) => arguments.clone(),
        serde_json::Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({})),
        _ => serde_json::json!({}),
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<NormalizedResponse, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);

        let mut options = serde_json::json!({ "temperature": request.temperature });
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = serde_json::json!(max_tokens);
        }

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": false,
            "options": options,
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        debug!(provider = "ollama", model = %request.model, "Sending completion request");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        let response = builder.send().await.map_err(http::send_error)?;

        if response.status().as_u16() == 404 {
            return Err(ProviderError::ModelNotFound(format!(
                "{} (try `ollama pull {}`)",
                request.model, request.model
            )));
        }

        let response = http::check_status(&self.name, response).await?;
        let api_resp: OllamaResponse = http::decode_json(response).await?;
        Self::normalize(api_resp, &request.tools)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await.map_err(http::send_error)?;
        Ok(response.status().is_success())
    }
}

// --- Ollama API types ---

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock;
    use serde_json::json;

    fn declared() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "search_stock".into(),
            description: "Search".into(),
            parameters: vec![],
        }]
    }

    fn parse(body: &str) -> std::result::Result<NormalizedResponse, ProviderError> {
        let resp: OllamaResponse = serde_json::from_str(body).unwrap();
        OllamaProvider::normalize(resp, &declared())
    }

    #[test]
    fn host_is_normalized() {
        let p = OllamaProvider::new(Some("http://localhost:11434/v1/"), Duration::from_secs(1)).unwrap();
        assert_eq!(p.base_url, "http://localhost:11434");
        let p = OllamaProvider::new(None, Duration::from_secs(1)).unwrap();
        assert_eq!(p.base_url, DEFAULT_OLLAMA_HOST);
    }

    #[test]
    fn structured_tool_calls_get_synthesized_ids() {
        let resp = parse(
            r#"{"model":"qwen2.5","done":true,"message":{"role":"assistant","content":"",
                "tool_calls":[
                    {"function":{"name":"search_stock","arguments":{"keyword":"银行"}}},
                    {"function":{"name":"search_stock","arguments":{"keyword":"保险"}}}
                ]},"prompt_eval_count":12,"eval_count":4}"#,
        )
        .unwrap();
        assert_eq!(resp.tool_calls.len(), 2);
        assert!(resp.tool_calls[0].id.starts_with("call_"));
        assert_ne!(resp.tool_calls[0].id, resp.tool_calls[1].id);
        assert_eq!(resp.tool_calls[1].arguments["keyword"], "保险");
        assert_eq!(resp.usage.unwrap().total_tokens, 16);
    }

    #[test]
    fn text_tool_call_is_recovered() {
        let resp = parse(
            r#"{"model":"qwen2.5","message":{"role":"assistant",
                "content":"<tool_call>{\"name\": \"search_stock\", \"arguments\": {\"keyword\": \"600000\"}}</tool_call>"}}"#,
        )
        .unwrap();
        assert!(resp.content.is_none());
        assert_eq!(resp.tool_calls[0].name, "search_stock");
    }

    #[test]
    fn plain_answer_passes_through() {
        let resp = parse(r#"{"model":"qwen2.5","message":{"role":"assistant","content":"Hello"}}"#).unwrap();
        assert_eq!(resp.content.as_deref(), Some("Hello"));
        assert!(resp.usage.is_none());
    }

    #[test]
    fn blank_answer_is_empty_response() {
        let err = parse(r#"{"model":"qwen2.5","message":{"role":"assistant","content":"  "}}"#).unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse));
    }

    #[test]
    fn tool_results_carry_tool_name() {
        let messages = vec![
            Message::assistant_tool_calls(
                "",
                vec![ToolCallRequest::new("call_1", "search_stock", json!({"keyword": "x"}))],
            ),
            Message::tool_result("call_1", "[]"),
        ];
        let api = OllamaProvider::to_api_messages(&messages);
        assert_eq!(api[1].role, "tool");
        assert_eq!(api[1].tool_name.as_deref(), Some("search_stock"));
        let encoded = serde_json::to_value(&api[0]).unwrap();
        assert_eq!(encoded["tool_calls"][0]["function"]["arguments"]["keyword"], "x");
    }

    #[tokio::test]
    async fn missing_model_maps_to_model_not_found() {
        let base = mock::serve_once(404, r#"{"error":"model 'nope' not found"}"#).await;
        let provider = OllamaProvider::new(Some(&base), Duration::from_secs(5)).unwrap();
        let request = ProviderRequest {
            model: "nope".into(),
            messages: vec![Message::user("hi")],
            tools: declared(),
            temperature: 0.2,
            max_tokens: None,
        };
        let err = provider.complete(request).await.unwrap_err();
        assert!(matches!(err, ProviderError::ModelNotFound(_)));
        assert!(!err.is_retryable());
    }
}
