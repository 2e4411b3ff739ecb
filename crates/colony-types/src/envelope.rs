use serde::{Deserialize, Serialize};

use crate::error::ColonyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
    RateLimited,
    Blocked,
}

/// Per-response diagnostics. Never carries stack traces or secrets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Component that raised the surfaced error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}

/// The envelope every gateway call returns, success or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub status: ResponseStatus,
    pub body: String,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

impl GatewayResponse {
    pub fn ok(body: impl Into<String>, diagnostics: Diagnostics) -> Self {
        Self {
            status: ResponseStatus::Ok,
            body: body.into(),
            diagnostics,
        }
    }

    /// Translate a surfaced error into the envelope. The body is a single
    /// line; the kind and raising component land in diagnostics.
    pub fn from_error(err: &ColonyError, component: &str) -> Self {
        let status = match err {
            ColonyError::RateLimited { .. } => ResponseStatus::RateLimited,
            _ => ResponseStatus::Error,
        };
        Self {
            status,
            body: err.to_string(),
            diagnostics: Diagnostics {
                error_kind: Some(err.kind().to_string()),
                component: Some(component.to_string()),
                ..Diagnostics::default()
            },
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Blocked,
            body: reason.into(),
            diagnostics: Diagnostics::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        let resp = GatewayResponse::from_error(
            &ColonyError::RateLimited {
                retry_after_secs: Some(30),
            },
            "facade",
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "rate_limited");
        assert_eq!(json["diagnostics"]["error_kind"], "rate_limited");
        assert_eq!(json["diagnostics"]["component"], "facade");
    }

    #[test]
    fn error_body_is_one_line() {
        let resp = GatewayResponse::from_error(&ColonyError::NotFound("tool `x`".into()), "tools");
        assert!(!resp.body.contains('\n'));
        assert_eq!(resp.status, ResponseStatus::Error);
    }
}
