use serde::Serialize;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    Engine,
    Cli,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Engine => "engine",
            ProcessKind::Cli => "cli",
        }
    }
}

/// Initialise the global subscriber. `RUST_LOG` wins over the default
/// filter. Safe to call once per process; subsequent calls are ignored.
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Machine-parsable lifecycle event. Free-text detail only; message bodies
/// go through `redact_text` first.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub subject: Option<&'a str>,
    pub status: Option<&'a str>,
    pub detail: Option<&'a str>,
}

pub fn emit_event(level: Level, process: ProcessKind, event: RuntimeEvent<'_>) {
    match level {
        Level::ERROR => tracing::error!(
            target: "colony.obs",
            process = process.as_str(),
            component = event.component,
            event = event.event,
            subject = event.subject.unwrap_or(""),
            status = event.status.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "runtime_event"
        ),
        Level::WARN => tracing::warn!(
            target: "colony.obs",
            process = process.as_str(),
            component = event.component,
            event = event.event,
            subject = event.subject.unwrap_or(""),
            status = event.status.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "runtime_event"
        ),
        _ => tracing::info!(
            target: "colony.obs",
            process = process.as_str(),
            component = event.component,
            event = event.event,
            subject = event.subject.unwrap_or(""),
            status = event.status.unwrap_or(""),
            detail = event.detail.unwrap_or(""),
            "runtime_event"
        ),
    }
}

/// Replace user text with a length + hash marker so bodies never reach the
/// log stream verbatim.
pub fn redact_text(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!(
        "[redacted len={} hash={}]",
        trimmed.len(),
        short_hash(trimmed)
    )
}

pub fn short_hash(input: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_hides_content() {
        let out = redact_text("my secret api key");
        assert!(!out.contains("secret"));
        assert!(out.starts_with("[redacted len=17"));
    }

    #[test]
    fn redaction_is_stable() {
        assert_eq!(redact_text("same input"), redact_text("same input"));
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(redact_text("   "), "");
    }
}
