use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use colony_types::ColonyError;

/// Run a future under both a deadline and a cancellation token. Cancellation
/// wins over the deadline when both fire; either way the future is dropped
/// at its next suspension point.
pub async fn run_bounded<F, T>(
    cancel: &CancellationToken,
    deadline: Duration,
    what: &str,
    fut: F,
) -> Result<T, ColonyError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ColonyError::Cancelled),
        outcome = tokio::time::timeout(deadline, fut) => {
            outcome.map_err(|_| ColonyError::Timeout(format!("{what} exceeded {}ms", deadline.as_millis())))
        }
    }
}

/// Cancellation-aware sleep. Returns `Err(Cancelled)` if the token fires
/// first.
pub async fn sleep_until_cancelled(
    cancel: &CancellationToken,
    duration: Duration,
) -> Result<(), ColonyError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ColonyError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_expiry_is_a_timeout() {
        let cancel = CancellationToken::new();
        let err = run_bounded(&cancel, Duration::from_millis(20), "probe", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn cancellation_wins_over_deadline() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_bounded(&cancel, Duration::from_secs(5), "probe", async { 1 })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }

    #[tokio::test]
    async fn fast_future_passes_through() {
        let cancel = CancellationToken::new();
        let value = run_bounded(&cancel, Duration::from_secs(1), "probe", async { 41 + 1 })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn child_token_inherits_parent_cancellation() {
        let root = CancellationToken::new();
        let child = root.child_token();
        root.cancel();
        let err = sleep_until_cancelled(&child, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }
}
