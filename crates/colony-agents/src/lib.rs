//! Background agents. Each runs under a supervisor scope, polls on its own
//! interval, writes through the shared state store, and alerts on
//! anomalies. Per-iteration failures alert and pause briefly instead of
//! killing the agent; only panics and startup failures reach the
//! supervisor's error path.

pub mod content;
pub mod market;
pub mod reports;
pub mod research;
pub mod whale;

pub use content::ContentAgent;
pub use market::MarketAgent;
pub use reports::{report_task, ReportKind};
pub use research::ResearchAgent;
pub use whale::WhaleAgent;

/// Pause after a failed iteration before retrying.
pub(crate) const ERROR_PAUSE: std::time::Duration = std::time::Duration::from_secs(10);
