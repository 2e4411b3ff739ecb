use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

use colony_types::{ColonyError, ColonyResult};

/// Sliding one-minute window per user. Comparison uses the full timestamp
/// delta, so entries from a previous day can never be mistaken for recent
/// ones.
pub struct RateLimiter {
    limit: u32,
    window: ChronoDuration,
    entries: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window: ChronoDuration::seconds(60),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request for `user`, or refuse it with a retry hint.
    pub fn check(&self, user: &str) -> ColonyResult<()> {
        self.check_at(user, Utc::now())
    }

    fn check_at(&self, user: &str, now: DateTime<Utc>) -> ColonyResult<()> {
        let mut entries = self.entries.lock();
        let timestamps = entries.entry(user.to_string()).or_default();
        timestamps.retain(|t| now.signed_duration_since(*t) < self.window);

        if timestamps.len() >= self.limit as usize {
            let retry_after_secs = timestamps
                .first()
                .map(|oldest| {
                    let remaining = self.window - now.signed_duration_since(*oldest);
                    remaining.num_seconds().max(0) as u64
                })
                .unwrap_or(60);
            return Err(ColonyError::RateLimited {
                retry_after_secs: Some(retry_after_secs),
            });
        }

        timestamps.push(now);
        Ok(())
    }

    pub fn tracked_users(&self) -> usize {
        self.entries.lock().len()
    }
}
