//! Thread-safe in-memory snapshot store, keyed by source id.
//!
//! Each `put` replaces the previous entry for the source and stamps it with
//! the current time. A background task ([`Store::run`]) evicts entries that
//! have not been refreshed within the TTL. The clock is injectable so tests
//! never sleep.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::proto::PipelineSnapshot;

type Clock = dyn Fn() -> DateTime<Utc> + Send + Sync;

/// A snapshot together with the time it was last received. The snapshot is
/// shared read-only; nothing mutates it after `put`.
#[derive(Clone)]
pub struct Entry {
    pub snapshot: Arc<PipelineSnapshot>,
    pub updated_at: DateTime<Utc>,
}

/// Concurrent TTL snapshot store.
pub struct Store {
    data: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
    now: Box<Clock>,
}

impl Store {
    /// Creates a store with the given TTL, using the system clock.
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Utc::now)
    }

    /// Creates a store with an injected clock for deterministic tests.
    pub fn with_clock(ttl: Duration, now: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            ttl,
            now: Box::new(now),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores or replaces the snapshot for its source id.
    pub fn put(&self, snap: PipelineSnapshot) {
        let entry = Entry {
            updated_at: (self.now)(),
            snapshot: Arc::new(snap),
        };
        let mut data = self.data.write().unwrap();
        data.insert(entry.snapshot.source_id.clone(), entry);
    }

    /// Returns the entry for the source, if present. The entry may be stale
    /// (age ≥ TTL) if eviction has not run yet; callers that need freshness
    /// compare `updated_at` themselves.
    pub fn get(&self, source_id: &str) -> Option<Entry> {
        self.data.read().unwrap().get(source_id).cloned()
    }

    /// Returns all entries younger than the TTL. Stale entries are excluded
    /// even when they have not been evicted yet.
    pub fn list(&self) -> Vec<Entry> {
        let cutoff = (self.now)() - self.ttl;
        self.data
            .read()
            .unwrap()
            .values()
            .filter(|e| e.updated_at > cutoff)
            .cloned()
            .collect()
    }

    /// Total number of entries currently held, including stale ones.
    pub fn count(&self) -> usize {
        self.data.read().unwrap().len()
    }

    /// Removes entries whose age at `now` is at least the TTL; returns the
    /// number removed.
    pub fn evict(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.ttl;
        let mut data = self.data.write().unwrap();
        let before = data.len();
        data.retain(|_, e| e.updated_at > cutoff);
        before - data.len()
    }

    /// Background TTL eviction loop. Ticks at half the TTL (minimum one
    /// second) until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let interval = (self.ttl / 2).max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    let removed = self.evict((self.now)());
                    if removed > 0 {
                        debug!("store: evicted stale snapshots: count={removed}");
                    }
                }
            }
        }
    }
}
