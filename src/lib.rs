//! Gatekeeper - Per-Client Admission Control
//!
//! This crate implements an admission-control gate: for each client address
//! it counts recent accesses in a persistent store, rejects clients that
//! exceeded the configured limit within a trailing timespan, and reports how
//! long they should wait. The store connection is kept alive by a retrying
//! connection manager that never gives up on its own.

pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod ratelimit;
pub mod store;

pub use error::{GateError, Result};
pub use identity::ClientIdentity;
pub use ratelimit::{Consistency, Gate, Policy, Verdict};
