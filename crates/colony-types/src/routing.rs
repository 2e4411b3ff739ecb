use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameter extraction strategy a profile declares. Extraction is
/// best-effort: a routine that finds nothing still leaves the raw message in
/// the parameter map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParamExtractor {
    #[default]
    None,
    /// `$SYM` tickers plus bare well-known symbols.
    TokenSymbols,
    /// Message text with leading question/command words stripped.
    TrailingQuery,
    /// Whole message as a content topic, with a format hint.
    Topic,
    /// Whole message as text to transform.
    Text,
}

/// Static skill descriptor registered at startup. Names are unique within a
/// process; patterns are compiled once by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillProfile {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub extractor: ParamExtractor,
}

impl SkillProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keywords: Vec::new(),
            patterns: Vec::new(),
            priority: 0,
            extractor: ParamExtractor::None,
        }
    }

    pub fn keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn patterns(mut self, patterns: &[&str]) -> Self {
        self.patterns = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn extractor(mut self, extractor: ParamExtractor) -> Self {
        self.extractor = extractor;
        self
    }
}

/// Routing outcome. `confidence` is clamped to [0, 1]; `skill` always names
/// a registered profile or the reserved general skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub skill: String,
    pub confidence: f64,
    #[serde(default)]
    pub params: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}
