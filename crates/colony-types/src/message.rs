use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One inbound request unit. Created by a gateway, passed by value into the
/// router, immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub text: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

impl InboundMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user_id: None,
            chat_id: None,
            timestamp: Utc::now(),
            attachments: Vec::new(),
        }
    }

    pub fn from_user(text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::new(text)
        }
    }
}
