use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use colony_providers::ChatModel;
use colony_tools::{invocation_body, ToolCatalog};
use colony_types::{ChatMessage, ColonyError, ColonyResult};

use crate::scope::run_bounded;

pub const DEFAULT_MAX_ITERS: u32 = 5;

/// Marker appended when the loop gives up after `max_iters` model turns.
pub const MAX_ITERATIONS_MARKER: &str = "[max_iterations]";

/// Drives the model ↔ tool conversation. Tools only ever execute through
/// the catalog; the model cannot reach anything else.
#[derive(Clone)]
pub struct ToolLoop {
    model: Arc<dyn ChatModel>,
    catalog: ToolCatalog,
}

impl ToolLoop {
    pub fn new(model: Arc<dyn ChatModel>, catalog: ToolCatalog) -> Self {
        Self { model, catalog }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Run up to `max_iters` model turns, executing requested tools between
    /// them, under one total deadline. Returns the model's final text.
    pub async fn run_loop(
        &self,
        messages: Vec<ChatMessage>,
        max_iters: u32,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> ColonyResult<String> {
        run_bounded(cancel, deadline, "tool loop", self.drive(messages, max_iters, cancel))
            .await?
    }

    async fn drive(
        &self,
        mut messages: Vec<ChatMessage>,
        max_iters: u32,
        cancel: &CancellationToken,
    ) -> ColonyResult<String> {
        let wire_tools = self.catalog.wire_schemas();
        let mut iterations = 0u32;

        loop {
            let turn = self.model.complete(&messages, &wire_tools, cancel).await?;
            if !turn.wants_tools() {
                return Ok(turn.content);
            }
            if iterations >= max_iters {
                // Tools requested but no iterations left: hand back what we
                // have, marked, without executing anything further.
                let text = turn.content.trim();
                return Ok(if text.is_empty() {
                    MAX_ITERATIONS_MARKER.to_string()
                } else {
                    format!("{text} {MAX_ITERATIONS_MARKER}")
                });
            }

            let mut assistant = ChatMessage::assistant(turn.content.clone());
            assistant.tool_calls = turn.tool_calls.clone();
            messages.push(assistant);

            // One result message per request, in request order, each tagged
            // with its invocation id.
            for request in &turn.tool_calls {
                let invocation = self.catalog.invoke(request, cancel).await?;
                debug!(
                    tool = %invocation.tool,
                    id = %invocation.id,
                    status = ?invocation.status,
                    "tool invocation finished"
                );
                messages.push(ChatMessage::tool_result(
                    invocation.id.as_str(),
                    &invocation_body(&invocation),
                ));
            }
            iterations += 1;
        }
    }
}

/// Convenience for one-shot prompts without prior history.
pub fn seed_messages(system: &str, user: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if !system.is_empty() {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(user));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use colony_providers::ModelTurn;
    use colony_tools::Tool;
    use colony_types::{FunctionCall, ToolCallRequest, ToolSchema};
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    /// Plays back a fixed sequence of turns and records what it was sent.
    struct ScriptedModel {
        turns: Mutex<Vec<ModelTurn>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        fn new(turns: Vec<ModelTurn>) -> Self {
            Self {
                turns: Mutex::new(turns),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _tools: &[Value],
            _cancel: &CancellationToken,
        ) -> ColonyResult<ModelTurn> {
            self.seen.lock().push(messages.to_vec());
            let mut turns = self.turns.lock();
            if turns.is_empty() {
                return Ok(ModelTurn {
                    content: "out of script".to_string(),
                    tool_calls: Vec::new(),
                });
            }
            Ok(turns.remove(0))
        }

        fn model_id(&self) -> &str {
            "scripted"
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "echo".to_string(),
                description: "Echo a value".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {"value": {"type": "string"}},
                    "required": ["value"]
                }),
            }
        }

        async fn execute(&self, args: Value) -> anyhow::Result<Value> {
            Ok(json!({"value": args["value"]}))
        }
    }

    fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    fn echo_catalog() -> ToolCatalog {
        ToolCatalog::build(vec![Arc::new(EchoTool)]).unwrap()
    }

    #[tokio::test]
    async fn executes_tool_then_returns_final_text() {
        let model = Arc::new(ScriptedModel::new(vec![
            ModelTurn {
                content: String::new(),
                tool_calls: vec![tool_call("call_1", "echo", r#"{"value":"hi"}"#)],
            },
            ModelTurn {
                content: "done".to_string(),
                tool_calls: Vec::new(),
            },
        ]));
        let tool_loop = ToolLoop::new(model.clone(), echo_catalog());

        let out = tool_loop
            .run_loop(
                seed_messages("", "say hi"),
                DEFAULT_MAX_ITERS,
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "done");

        // Second model call must carry the assistant turn plus one tool
        // result tagged with the invocation id.
        let seen = model.seen.lock();
        assert_eq!(seen.len(), 2);
        let second = &seen[1];
        let tool_msg = second.iter().find(|m| m.role == "tool").unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
        let body: Value = serde_json::from_str(&tool_msg.content).unwrap();
        assert_eq!(body["value"], "hi");
    }

    #[tokio::test]
    async fn plain_answer_needs_no_tools() {
        let model = Arc::new(ScriptedModel::new(vec![ModelTurn {
            content: "just text".to_string(),
            tool_calls: Vec::new(),
        }]));
        let tool_loop = ToolLoop::new(model, echo_catalog());
        let out = tool_loop
            .run_loop(
                seed_messages("sys", "hello"),
                DEFAULT_MAX_ITERS,
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "just text");
    }

    #[tokio::test]
    async fn zero_iterations_never_executes_a_tool() {
        let model = Arc::new(ScriptedModel::new(vec![ModelTurn {
            content: "wanted a tool".to_string(),
            tool_calls: vec![tool_call("call_1", "echo", r#"{"value":"x"}"#)],
        }]));
        let tool_loop = ToolLoop::new(model.clone(), echo_catalog());
        let out = tool_loop
            .run_loop(
                seed_messages("", "q"),
                0,
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, format!("wanted a tool {MAX_ITERATIONS_MARKER}"));
        // Exactly one model call, no tool results ever produced.
        assert_eq!(model.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_structured_error_result() {
        let model = Arc::new(ScriptedModel::new(vec![
            ModelTurn {
                content: String::new(),
                tool_calls: vec![tool_call("call_7", "missing", "{}")],
            },
            ModelTurn {
                content: "recovered".to_string(),
                tool_calls: Vec::new(),
            },
        ]));
        let tool_loop = ToolLoop::new(model.clone(), echo_catalog());
        let out = tool_loop
            .run_loop(
                seed_messages("", "q"),
                DEFAULT_MAX_ITERS,
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "recovered");
        let seen = model.seen.lock();
        let tool_msg = seen[1].iter().find(|m| m.role == "tool").unwrap();
        assert!(tool_msg.content.contains("tool_not_found"));
    }

    #[tokio::test]
    async fn multiple_requests_answered_in_order() {
        let model = Arc::new(ScriptedModel::new(vec![
            ModelTurn {
                content: String::new(),
                tool_calls: vec![
                    tool_call("call_a", "echo", r#"{"value":"first"}"#),
                    tool_call("call_b", "echo", r#"{"value":"second"}"#),
                ],
            },
            ModelTurn {
                content: "ok".to_string(),
                tool_calls: Vec::new(),
            },
        ]));
        let tool_loop = ToolLoop::new(model.clone(), echo_catalog());
        tool_loop
            .run_loop(
                seed_messages("", "q"),
                DEFAULT_MAX_ITERS,
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let seen = model.seen.lock();
        let ids: Vec<&str> = seen[1]
            .iter()
            .filter(|m| m.role == "tool")
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(ids, vec!["call_a", "call_b"]);
    }

    #[tokio::test]
    async fn total_deadline_bounds_the_loop() {
        struct StallingModel;

        #[async_trait]
        impl ChatModel for StallingModel {
            async fn complete(
                &self,
                _messages: &[ChatMessage],
                _tools: &[Value],
                _cancel: &CancellationToken,
            ) -> ColonyResult<ModelTurn> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ModelTurn::default())
            }

            fn model_id(&self) -> &str {
                "stalling"
            }
        }

        let tool_loop = ToolLoop::new(Arc::new(StallingModel), echo_catalog());
        let err = tool_loop
            .run_loop(
                seed_messages("", "q"),
                DEFAULT_MAX_ITERS,
                Duration::from_millis(50),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }
}
