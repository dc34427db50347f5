//! Connection management for store backends.
//!
//! A [`ConnectionManager`] owns one backend connection, opens it lazily,
//! health-probes it, and keeps retrying in bursts with randomized backoff
//! until it succeeds or is shut down.

mod manager;
mod retry;

pub use manager::{ConnectionManager, ConnectionState, Connector};
pub use retry::{RetryConfig, DEFAULT_BURST};
