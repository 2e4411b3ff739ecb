use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Failure of a single attempt against one endpoint.
#[derive(Debug, Clone)]
pub enum EndpointError {
    /// HTTP 429 or equivalent. Carries the server's Retry-After hint when
    /// one was sent.
    RateLimited { retry_after: Option<Duration> },
    /// Non-success status other than 429.
    Status { code: u16, detail: String },
    /// Connect/read/serialisation failure.
    Transport(String),
}

impl std::fmt::Display for EndpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointError::RateLimited { retry_after } => match retry_after {
                Some(d) => write!(f, "rate limited, retry after {}s", d.as_secs()),
                None => write!(f, "rate limited"),
            },
            EndpointError::Status { code, detail } => write!(f, "status {code}: {detail}"),
            EndpointError::Transport(detail) => write!(f, "transport: {detail}"),
        }
    }
}

impl std::error::Error for EndpointError {}

/// One interchangeable upstream. The dispatcher treats all endpoints of a
/// task as equivalent and races them.
#[async_trait]
pub trait Endpoint: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, method: &str, params: &Value) -> Result<Value, EndpointError>;
}

/// JSON-RPC 2.0 over HTTP POST, the shape DEX and chain RPC nodes speak.
pub struct HttpJsonRpcEndpoint {
    name: String,
    url: String,
    client: Client,
}

impl HttpJsonRpcEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Endpoint for HttpJsonRpcEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, method: &str, params: &Value) -> Result<Value, EndpointError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EndpointError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(EndpointError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(EndpointError::Status {
                code: status.as_u16(),
                detail: detail.chars().take(200).collect(),
            });
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| EndpointError::Transport(e.to_string()))?;
        if let Some(err) = body.get("error") {
            return Err(EndpointError::Status {
                code: 200,
                detail: err.to_string(),
            });
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| EndpointError::Transport("response missing result".to_string()))
    }
}
