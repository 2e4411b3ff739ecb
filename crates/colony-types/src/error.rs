use thiserror::Error;

/// Cross-component failure taxonomy. Components recover what they can
/// locally and surface the residual as one of these kinds; the facade turns
/// them into response envelopes.
#[derive(Debug, Clone, Error)]
pub enum ColonyError {
    /// Malformed input. Never retried.
    #[error("usage error: {0}")]
    Usage(String),

    /// Per-user bucket exhausted or every endpoint in cooldown.
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Cooperative cancellation. Propagated upward, not logged as a failure.
    #[error("cancelled")]
    Cancelled,

    /// Deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Network blip, 5xx, transient storage failure. Retried locally first.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unknown agent, tool, or skill.
    #[error("not found: {0}")]
    NotFound(String),

    /// Latest-wins collection rejected an entry on schema check.
    #[error("state overflow: {0}")]
    StateOverflow(String),

    /// Invariant violation. Triggers orderly shutdown.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ColonyError {
    pub fn kind(&self) -> &'static str {
        match self {
            ColonyError::Usage(_) => "usage",
            ColonyError::RateLimited { .. } => "rate_limited",
            ColonyError::Cancelled => "cancelled",
            ColonyError::Timeout(_) => "timeout",
            ColonyError::Transient(_) => "transient",
            ColonyError::NotFound(_) => "not_found",
            ColonyError::StateOverflow(_) => "state_overflow",
            ColonyError::Fatal(_) => "fatal",
        }
    }

    /// Whether the component that raised it may retry internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ColonyError::Transient(_) | ColonyError::Timeout(_))
    }
}

pub type ColonyResult<T> = Result<T, ColonyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_strings() {
        assert_eq!(ColonyError::Cancelled.kind(), "cancelled");
        assert_eq!(
            ColonyError::RateLimited {
                retry_after_secs: Some(60)
            }
            .kind(),
            "rate_limited"
        );
        assert_eq!(ColonyError::Fatal("dup".into()).kind(), "fatal");
    }

    #[test]
    fn only_transient_and_timeout_retry() {
        assert!(ColonyError::Transient("503".into()).is_retryable());
        assert!(ColonyError::Timeout("dispatch".into()).is_retryable());
        assert!(!ColonyError::Usage("empty".into()).is_retryable());
        assert!(!ColonyError::Cancelled.is_retryable());
    }
}
