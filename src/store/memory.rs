//! In-memory counter store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::trace;

use super::{Clock, CounterStore, StoreError, SystemClock, WindowCount};

/// Counter store holding access records in process memory.
///
/// Records are never pruned, mirroring the append-only table the
/// PostgreSQL backend writes to.
#[derive(Debug)]
pub struct MemoryStore {
    /// Access timestamps per identity, in insertion order
    records: DashMap<String, Vec<DateTime<Utc>>>,
    /// Clock used to stamp the window
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create a store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Total number of records stored for `identity`, in or out of any window.
    pub fn record_count(&self, identity: &str) -> usize {
        self.records.get(identity).map(|r| r.len()).unwrap_or(0)
    }

    /// Number of identities with at least one record.
    pub fn identity_count(&self) -> usize {
        self.records.len()
    }

    fn window_of(timestamps: &[DateTime<Utc>], window_start: DateTime<Utc>) -> WindowCount {
        timestamps
            .iter()
            .filter(|ts| **ts > window_start)
            .fold(WindowCount::empty(), |acc, ts| WindowCount {
                count: acc.count + 1,
                oldest: Some(acc.oldest.map_or(*ts, |o| o.min(*ts))),
            })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn now(&self) -> Result<DateTime<Utc>, StoreError> {
        Ok(self.clock.now())
    }

    async fn count_since(
        &self,
        identity: &str,
        window_start: DateTime<Utc>,
    ) -> Result<WindowCount, StoreError> {
        let window = self
            .records
            .get(identity)
            .map(|r| Self::window_of(&r, window_start))
            .unwrap_or_else(WindowCount::empty);

        trace!(identity = %identity, count = window.count, "Counted in-memory accesses");
        Ok(window)
    }

    async fn append(&self, identity: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.records.entry(identity.to_string()).or_default().push(at);
        Ok(())
    }

    fn supports_atomic_admit(&self) -> bool {
        true
    }

    async fn admit_if_below(
        &self,
        identity: &str,
        window_start: DateTime<Utc>,
        at: DateTime<Utc>,
        limit: u64,
    ) -> Result<WindowCount, StoreError> {
        // The entry guard holds the shard lock across count and push.
        let mut records = self.records.entry(identity.to_string()).or_default();
        let window = Self::window_of(&records, window_start);
        if window.count < limit {
            records.push(at);
        }
        Ok(window)
    }
}
