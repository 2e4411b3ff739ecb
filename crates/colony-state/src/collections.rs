use std::collections::{HashMap, VecDeque};

use tokio::sync::broadcast;

use crate::subscribe::Published;

/// Subscriber inbound buffer. A receiver further behind than this loses the
/// oldest undelivered revisions.
pub const SUBSCRIBER_BUFFER: usize = 64;

/// Maximum cardinality per collection. Eviction absorbs writes beyond the
/// bound, so ordered inserts never fail.
#[derive(Debug, Clone, Copy)]
pub struct StateLimits {
    pub arbitrage: usize,
    pub whales: usize,
    pub research: usize,
    pub content: usize,
    pub alerts: usize,
}

impl Default for StateLimits {
    fn default() -> Self {
        Self {
            arbitrage: 50,
            whales: 100,
            research: 50,
            content: 50,
            alerts: 100,
        }
    }
}

/// Bounded ordered sequence. Oldest-first eviction unless the caller
/// supplies an eviction index. Eviction never notifies subscribers.
pub(crate) struct Bounded<T> {
    items: VecDeque<T>,
    max: usize,
    revision: u64,
    tx: broadcast::Sender<Published<T>>,
}

impl<T: Clone> Bounded<T> {
    pub fn new(max: usize) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            items: VecDeque::with_capacity(max.min(64)),
            max,
            revision: 0,
            tx,
        }
    }

    /// Append, evicting the oldest entry when full. Publishes the insert
    /// before returning.
    pub fn push(&mut self, entry: T) -> u64 {
        if self.items.len() >= self.max {
            self.items.pop_front();
        }
        self.items.push_back(entry.clone());
        self.publish(entry)
    }

    /// Append, evicting the entry chosen by `evict_index` when full. Used
    /// by by-priority collections (lowest profit first).
    pub fn push_evicting<F>(&mut self, entry: T, evict_index: F) -> u64
    where
        F: Fn(&VecDeque<T>) -> Option<usize>,
    {
        if self.items.len() >= self.max {
            if let Some(idx) = evict_index(&self.items) {
                self.items.remove(idx);
            } else {
                self.items.pop_front();
            }
        }
        self.items.push_back(entry.clone());
        self.publish(entry)
    }

    pub fn list(&self, limit: Option<usize>) -> Vec<T> {
        let take = limit.unwrap_or(self.items.len());
        self.items.iter().rev().take(take).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn replace(&mut self, items: Vec<T>) {
        self.items = items.into_iter().collect();
        while self.items.len() > self.max {
            self.items.pop_front();
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Published<T>> {
        self.tx.subscribe()
    }

    fn publish(&mut self, entry: T) -> u64 {
        self.revision += 1;
        // No receivers is fine; send only fails when nobody listens.
        let _ = self.tx.send(Published {
            revision: self.revision,
            entry,
        });
        self.revision
    }
}

/// Latest-wins map keyed by entry identity. Replacement, not eviction;
/// inserts only fail a declared schema check.
pub(crate) struct LatestWins<T> {
    items: HashMap<String, T>,
    revision: u64,
    tx: broadcast::Sender<Published<T>>,
}

impl<T: Clone> LatestWins<T> {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            items: HashMap::new(),
            revision: 0,
            tx,
        }
    }

    pub fn put(&mut self, key: String, entry: T) -> u64 {
        self.items.insert(key, entry.clone());
        self.revision += 1;
        let _ = self.tx.send(Published {
            revision: self.revision,
            entry,
        });
        self.revision
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.items.get(key).cloned()
    }

    pub fn all(&self) -> HashMap<String, T> {
        self.items.clone()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn replace(&mut self, items: HashMap<String, T>) {
        self.items = items;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Published<T>> {
        self.tx.subscribe()
    }
}
