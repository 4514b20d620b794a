//! Tool trait and registry: the catalogue of capabilities the model can call.
//!
//! Each tool declares a typed parameter list. The registry validates and
//! coerces the backend's arguments against that list before the handler runs,
//! and turns every failure into an in-band [`ToolResult`] with
//! `is_error = true`. Dispatch never returns an `Err`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::message::ToolCallRequest;

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    fn json_type(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub required: bool,
    pub description: String,
    /// Value filled in when the argument is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterSpec {
    pub fn required(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
            default: None,
        }
    }

    pub fn optional(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: description.into(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// A tool declaration sent to the LLM so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name, unique within a registry
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// Declared parameters, in order
    pub parameters: Vec<ParameterSpec>,
}

impl ToolDefinition {
    /// Render the parameter list as a JSON Schema object.
    ///
    /// This is the shape all three backends accept for tool parameters.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), Value::from(param.kind.json_type()));
            prop.insert("description".into(), Value::from(param.description.clone()));
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(Value::from(param.name.clone()));
            }
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Arguments that passed validation, coerced to their declared types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    values: Map<String, Value>,
}

impl ToolArgs {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(Value::as_f64)
    }

    /// Get a string argument that the schema marks as required.
    pub fn require_str(&self, name: &str) -> Result<&str, ToolError> {
        self.str(name)
            .ok_or_else(|| ToolError::InvalidArguments(format!("missing required argument '{name}'")))
    }
}

/// The result of dispatching one tool call.
///
/// Always paired 1:1 with the [`ToolCallRequest`] it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub tool_call_id: String,

    /// Structured payload, or a human-readable reason when `is_error`
    pub content: Value,

    /// Whether dispatch or execution failed
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, content: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content,
            is_error: false,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: Value::String(reason.into()),
            is_error: true,
        }
    }

    /// Serialize the payload into the text a tool-role message carries.
    pub fn to_message_content(&self) -> String {
        let body = match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if self.is_error {
            format!("Error: {body}")
        } else {
            body
        }
    }
}

/// The core Tool trait.
///
/// Handlers read the data store and return a JSON value. They never see or
/// mutate the conversation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "search_stock").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// Declared parameters, in order.
    fn parameters(&self) -> Vec<ParameterSpec>;

    /// Execute the tool with validated arguments.
    async fn execute(&self, args: ToolArgs) -> Result<Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// A registry of available tools, in registration order.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name in place.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&pos) => self.tools[pos] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.index.get(name).map(|&pos| self.tools[pos].as_ref())
    }

    /// All tool definitions, in stable registration order.
    pub fn list_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up, validate, and execute one tool call.
    ///
    /// Unknown tools, invalid arguments and handler failures all come back as
    /// `ToolResult { is_error: true, .. }`.
    pub async fn dispatch(&self, call: &ToolCallRequest) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, "Backend requested an undeclared tool");
            return ToolResult::error(&call.id, ToolError::NotFound(call.name.clone()).to_string());
        };

        let args = match validate_arguments(&tool.parameters(), &call.arguments) {
            Ok(args) => args,
            Err(e) => {
                debug!(tool = %call.name, error = %e, "Rejected tool arguments");
                return ToolResult::error(&call.id, e.to_string());
            }
        };

        match tool.execute(args).await {
            Ok(content) => ToolResult::success(&call.id, content),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                ToolResult::error(&call.id, e.to_string())
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check `raw` against the declared parameters and coerce each value.
///
/// Undeclared keys are dropped. Absent optional parameters take their
/// declared default, if any.
pub fn validate_arguments(params: &[ParameterSpec], raw: &Value) -> Result<ToolArgs, ToolError> {
    let supplied: Map<String, Value> = match raw {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        // Some backends double-encode the argument object as a string.
        Value::String(s) if s.trim().is_empty() => Map::new(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => {
                return Err(ToolError::InvalidArguments(
                    "arguments must be a JSON object".into(),
                ));
            }
        },
        _ => {
            return Err(ToolError::InvalidArguments(
                "arguments must be a JSON object".into(),
            ));
        }
    };

    let mut values = Map::new();
    for param in params {
        match supplied.get(&param.name).filter(|v| !v.is_null()) {
            Some(value) => {
                let coerced = coerce(value, param.kind).ok_or_else(|| {
                    ToolError::InvalidArguments(format!(
                        "argument '{}' must be of type {}, got {}",
                        param.name,
                        param.kind.json_type(),
                        value
                    ))
                })?;
                values.insert(param.name.clone(), coerced);
            }
            None if param.required => {
                return Err(ToolError::InvalidArguments(format!(
                    "missing required argument '{}'",
                    param.name
                )));
            }
            None => {
                if let Some(default) = &param.default {
                    values.insert(param.name.clone(), default.clone());
                }
            }
        }
    }

    Ok(ToolArgs::new(values))
}

fn coerce(value: &Value, kind: ParamType) -> Option<Value> {
    match kind {
        ParamType::String => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        ParamType::Integer => {
            let n = match value {
                Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
                Value::String(s) => {
                    let s = s.trim();
                    s.parse::<i64>()
                        .ok()
                        .or_else(|| s.parse::<f64>().ok().and_then(integral))
                }
                _ => None,
            }?;
            Some(Value::from(n))
        }
        ParamType::Number => {
            let n = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }?;
            serde_json::Number::from_f64(n).map(Value::Number)
        }
        ParamType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}
