//! Counter store: the persistent log of client accesses.
//!
//! The decision engine only talks to the [`CounterStore`] trait, so the
//! same policy runs against PostgreSQL in production and against
//! [`MemoryStore`] in tests or single-process deployments.

mod clock;
mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::MemoryStore;
pub use postgres::{validate_table_name, PgConnection, PostgresConnector, PostgresStore};

/// Errors that can occur talking to a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No store location was configured. Never retried.
    #[error("no store target configured")]
    MissingTarget,
    /// Opening a connection failed.
    #[error("failed to connect to store: {0}")]
    Connect(String),
    /// A connection opened but the backend did not answer the health probe.
    #[error("store health probe failed: {0}")]
    Probe(String),
    /// A query failed on a live PostgreSQL connection.
    #[error("store query failed: {0}")]
    Query(#[from] tokio_postgres::Error),
    /// A non-PostgreSQL backend reported a failure.
    #[error("store backend error: {0}")]
    Backend(String),
    /// The connection loop was cancelled before a connection was available.
    #[error("store connection manager is shutting down")]
    Shutdown,
    /// The store does not implement the requested operation.
    #[error("operation not supported by this store: {0}")]
    Unsupported(&'static str),
}

/// Result of counting one identity's accesses inside a window.
///
/// Both fields come from the same read, so the wait hint derived from
/// `oldest` always matches the count used for the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Number of access records strictly after the window start.
    pub count: u64,
    /// Earliest access inside the window, if any.
    pub oldest: Option<DateTime<Utc>>,
}

impl WindowCount {
    /// A window with no recorded accesses.
    pub fn empty() -> Self {
        Self {
            count: 0,
            oldest: None,
        }
    }
}

/// Capability set every counter backend provides.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current time according to the store.
    ///
    /// Window boundaries and new records are both stamped with this clock
    /// so a skewed caller cannot undercount.
    async fn now(&self) -> Result<DateTime<Utc>, StoreError>;

    /// Count the accesses recorded for `identity` after `window_start`.
    async fn count_since(
        &self,
        identity: &str,
        window_start: DateTime<Utc>,
    ) -> Result<WindowCount, StoreError>;

    /// Record one access. Not idempotent: every call adds a record.
    async fn append(&self, identity: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Whether [`CounterStore::admit_if_below`] is implemented.
    fn supports_atomic_admit(&self) -> bool {
        false
    }

    /// Count and, if the count is below `limit`, append in one atomic step.
    ///
    /// Returns the count observed before the write; the caller admitted the
    /// access iff `count < limit`.
    async fn admit_if_below(
        &self,
        _identity: &str,
        _window_start: DateTime<Utc>,
        _at: DateTime<Utc>,
        _limit: u64,
    ) -> Result<WindowCount, StoreError> {
        Err(StoreError::Unsupported("atomic admission"))
    }
}
