use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Declared tool surface: name, description, and a JSON-Schema object
/// describing the parameters. The catalog is immutable after startup and
/// tool names are unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    /// OpenAI-style `tools` array entry.
    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Structured output of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub output: Value,
    #[serde(default)]
    pub metadata: Value,
}

impl ToolOutput {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            metadata: json!({}),
        }
    }
}

/// One tool call requested by the model, OpenAI wire shape:
/// `{id, type: "function", function: {name, arguments}}` where `arguments`
/// is an opaque JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    #[serde(rename = "type", default = "function_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_call_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Record of one executed (or rejected) tool call inside a tool-calling
/// loop. The id always matches the model's request id so result order is
/// reconstructible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub tool: String,
    pub arguments: Value,
    pub status: InvocationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Chat message for the completions wire. `tool_calls` is present on
/// assistant messages that request invocations; `tool_call_id` on the
/// per-result `tool` messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    /// Tool-result message carrying the invocation id and a JSON body.
    pub fn tool_result(tool_call_id: impl Into<String>, content: &Value) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.to_string(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_wire_shape_matches_openai() {
        let schema = ToolSchema {
            name: "echo".to_string(),
            description: "Echo a value".to_string(),
            parameters: json!({"type":"object","properties":{"value":{"type":"string"}},"required":["value"]}),
        };
        let wire = schema.to_wire();
        assert_eq!(wire["type"], "function");
        assert_eq!(wire["function"]["name"], "echo");
        assert!(wire["function"]["parameters"]["properties"]["value"].is_object());
    }

    #[test]
    fn tool_result_message_carries_call_id() {
        let msg = ChatMessage::tool_result("call_1", &json!({"value": "hi"}));
        assert_eq!(msg.role, "tool");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        let parsed: Value = serde_json::from_str(&msg.content).unwrap();
        assert_eq!(parsed["value"], "hi");
    }
}
