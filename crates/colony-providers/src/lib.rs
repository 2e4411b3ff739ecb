//! Language-model adapter. One trait, one HTTP implementation speaking the
//! OpenAI chat-completions wire (`tools` in, `tool_calls` out); the runtime
//! treats the argument strings as opaque JSON.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use colony_types::{ChatMessage, ColonyError, FunctionCall, ToolCallRequest};

/// One model turn: assistant text plus zero or more requested tool calls.
#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelTurn {
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send the message list plus the tool catalog and return the model's
    /// turn. Implementations retry transient failures internally.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        cancel: &CancellationToken,
    ) -> Result<ModelTurn, ColonyError>;

    fn model_id(&self) -> &str;
}

/// OpenAI-compatible chat-completions client. Works against any endpoint
/// speaking that dialect; configured entirely from the environment.
pub struct OpenAiChatModel {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);
const TRANSIENT_RETRIES: u32 = 2;

impl OpenAiChatModel {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(COMPLETION_TIMEOUT)
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    async fn request_once(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> anyhow::Result<ModelTurn> {
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        if !tools.is_empty() {
            payload["tools"] = Value::Array(tools.to_vec());
        }

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("completion request failed")?;

        let status = resp.status();
        if status.as_u16() == 429 {
            bail!("model endpoint rate limited");
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let preview: String = body.chars().take(300).collect();
            bail!("model endpoint returned {status}: {preview}");
        }

        let body: Value = resp.json().await.context("completion body not JSON")?;
        Ok(parse_completion(&body))
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        cancel: &CancellationToken,
    ) -> Result<ModelTurn, ColonyError> {
        let mut attempt = 0;
        loop {
            let request = self.request_once(messages, tools);
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ColonyError::Cancelled),
                outcome = request => outcome,
            };
            match outcome {
                Ok(turn) => {
                    debug!(model = %self.model, tool_calls = turn.tool_calls.len(), "model turn");
                    return Ok(turn);
                }
                Err(err) if attempt < TRANSIENT_RETRIES => {
                    attempt += 1;
                    let backoff = Duration::from_millis(500 * u64::from(attempt));
                    warn!(%err, attempt, "completion failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ColonyError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(err) => return Err(ColonyError::Transient(format!("{err:#}"))),
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Pull content and tool calls out of a completions response. Missing or
/// oddly-shaped fields degrade to an empty turn rather than an error; the
/// loop treats "no tool calls" as a final answer.
pub fn parse_completion(body: &Value) -> ModelTurn {
    let message = &body["choices"][0]["message"];
    let content = message["content"].as_str().unwrap_or("").to_string();
    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let id = call["id"].as_str()?.to_string();
                    let name = call["function"]["name"].as_str()?.to_string();
                    let arguments = call["function"]["arguments"]
                        .as_str()
                        .unwrap_or("{}")
                        .to_string();
                    Some(ToolCallRequest {
                        id,
                        call_type: "function".to_string(),
                        function: FunctionCall { name, arguments },
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    ModelTurn {
        content,
        tool_calls,
    }
}
