use tokio::sync::broadcast;

/// One published revision of a collection entry.
#[derive(Debug, Clone)]
pub struct Published<T> {
    pub revision: u64,
    pub entry: T,
}

/// Receiver side of a collection subscription. Fan-out is non-blocking: when
/// the inbound buffer overflows, the oldest undelivered revisions are lost
/// and counted in `dropped`.
pub struct Subscription<T> {
    rx: broadcast::Receiver<Published<T>>,
    predicate: Option<Box<dyn Fn(&T) -> bool + Send>>,
    dropped: u64,
}

impl<T: Clone> Subscription<T> {
    pub(crate) fn new(
        rx: broadcast::Receiver<Published<T>>,
        predicate: Option<Box<dyn Fn(&T) -> bool + Send>>,
    ) -> Self {
        Self {
            rx,
            predicate,
            dropped: 0,
        }
    }

    /// Next matching revision, or `None` once the store is gone. Lagged
    /// gaps are recorded and skipped, never surfaced as errors.
    pub async fn next(&mut self) -> Option<Published<T>> {
        loop {
            match self.rx.recv().await {
                Ok(published) => {
                    if let Some(predicate) = &self.predicate {
                        if !predicate(&published.entry) {
                            continue;
                        }
                    }
                    return Some(published);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.dropped += missed;
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Revisions lost to buffer overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
