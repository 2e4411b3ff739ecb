use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use colony_types::{
    ColonyError, InvocationStatus, ToolCallRequest, ToolInvocation, ToolSchema,
};

use crate::validate::{validate_args, validate_tool_schemas};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    async fn execute(&self, args: Value) -> anyhow::Result<Value>;
    /// Hard bound on one execution. Tools doing outbound I/O should set
    /// this below the loop's total deadline.
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }
}

/// Immutable-after-startup tool registry. Name collisions and malformed
/// parameter schemas are construction failures, not runtime surprises.
#[derive(Clone)]
pub struct ToolCatalog {
    tools: Arc<HashMap<String, Arc<dyn Tool>>>,
}

impl std::fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCatalog").finish_non_exhaustive()
    }
}

impl ToolCatalog {
    pub fn build(tools: Vec<Arc<dyn Tool>>) -> Result<Self, ColonyError> {
        let mut map: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        for tool in tools {
            let name = tool.schema().name;
            if map.insert(name.clone(), tool).is_some() {
                return Err(ColonyError::Fatal(format!(
                    "duplicate tool registration: {name}"
                )));
            }
        }
        let catalog = Self {
            tools: Arc::new(map),
        };
        validate_tool_schemas(&catalog.schemas())
            .map_err(|e| ColonyError::Fatal(e.to_string()))?;
        Ok(catalog)
    }

    pub fn empty() -> Self {
        Self {
            tools: Arc::new(HashMap::new()),
        }
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// OpenAI-style `tools` array for the completions request.
    pub fn wire_schemas(&self) -> Vec<Value> {
        self.schemas().iter().map(|s| s.to_wire()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute one requested call. Unknown tools, bad arguments, timeouts
    /// and execution errors all come back as a `Failed` invocation carrying
    /// the request id; only cancellation escapes as an error.
    pub async fn invoke(
        &self,
        request: &ToolCallRequest,
        cancel: &CancellationToken,
    ) -> Result<ToolInvocation, ColonyError> {
        let name = request.function.name.as_str();
        let args: Value = match serde_json::from_str(&request.function.arguments) {
            Ok(value) => value,
            Err(err) => {
                return Ok(failed(
                    request,
                    Value::Null,
                    format!("argument_error: arguments are not valid JSON: {err}"),
                ));
            }
        };

        let Some(tool) = self.tools.get(name) else {
            return Ok(failed(
                request,
                args,
                format!("tool_not_found: no tool named `{name}`"),
            ));
        };

        let schema = tool.schema();
        if let Err(reason) = validate_args(&schema.parameters, &args) {
            return Ok(failed(request, args, format!("argument_error: {reason}")));
        }

        debug!(tool = name, id = %request.id, "executing tool");
        let execution = tool.execute(args.clone());
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(ColonyError::Cancelled),
            outcome = tokio::time::timeout(tool.timeout(), execution) => outcome,
        };

        Ok(match outcome {
            Ok(Ok(result)) => ToolInvocation {
                id: request.id.clone(),
                tool: name.to_string(),
                arguments: args,
                status: InvocationStatus::Succeeded,
                result: Some(result),
                error: None,
            },
            Ok(Err(err)) => failed(request, args, format!("tool_error: {err:#}")),
            Err(_) => failed(
                request,
                args,
                format!(
                    "tool_timeout: exceeded {}s",
                    tool.timeout().as_secs()
                ),
            ),
        })
    }
}

fn failed(request: &ToolCallRequest, args: Value, error: String) -> ToolInvocation {
    ToolInvocation {
        id: request.id.clone(),
        tool: request.function.name.clone(),
        arguments: args,
        status: InvocationStatus::Failed,
        result: None,
        error: Some(error),
    }
}

/// The JSON body a `tool` role message carries for an invocation.
pub fn invocation_body(invocation: &ToolInvocation) -> Value {
    match (&invocation.result, &invocation.error) {
        (Some(result), _) => result.clone(),
        (None, Some(error)) => json!({ "error": error }),
        (None, None) => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colony_types::FunctionCall;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "echo".to_string(),
                description: "Echo a value back".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": { "value": {"type": "string"} },
                    "required": ["value"]
                }),
            }
        }

        async fn execute(&self, args: Value) -> anyhow::Result<Value> {
            Ok(json!({ "value": args["value"] }))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "slow".to_string(),
                description: "Sleeps past its own timeout".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        async fn execute(&self, _args: Value) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(50)
        }
    }

    fn request(name: &str, arguments: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    fn catalog() -> ToolCatalog {
        ToolCatalog::build(vec![Arc::new(EchoTool), Arc::new(SlowTool)]).unwrap()
    }

    #[tokio::test]
    async fn happy_path_returns_succeeded_invocation() {
        let inv = catalog()
            .invoke(&request("echo", r#"{"value":"hi"}"#), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(inv.status, InvocationStatus::Succeeded);
        assert_eq!(inv.id, "call_1");
        assert_eq!(inv.result.unwrap()["value"], "hi");
    }

    #[tokio::test]
    async fn unknown_tool_synthesizes_failure() {
        let inv = catalog()
            .invoke(&request("nope", "{}"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(inv.status, InvocationStatus::Failed);
        assert!(inv.error.unwrap().starts_with("tool_not_found"));
    }

    #[tokio::test]
    async fn invalid_arguments_fail_before_execution() {
        let inv = catalog()
            .invoke(&request("echo", r#"{"value": 3}"#), &CancellationToken::new())
            .await
            .unwrap();
        assert!(inv.error.unwrap().starts_with("argument_error"));

        let inv = catalog()
            .invoke(&request("echo", "not json"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(inv.error.unwrap().starts_with("argument_error"));
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let inv = catalog()
            .invoke(&request("slow", "{}"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(inv.status, InvocationStatus::Failed);
        assert!(inv.error.unwrap().starts_with("tool_timeout"));
    }

    #[tokio::test]
    async fn cancellation_escapes_instead_of_failing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = catalog()
            .invoke(&request("slow", "{}"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }

    #[test]
    fn duplicate_names_fail_construction() {
        let err = ToolCatalog::build(vec![Arc::new(EchoTool), Arc::new(EchoTool)]).unwrap_err();
        assert_eq!(err.kind(), "fatal");
    }
}
