//! Error types for the gatekeeper service.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for gatekeeper operations.
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration source could not be read or deserialized
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// A client address the caller could not turn into an identity
    #[error("Invalid client identity: {0}")]
    InvalidIdentity(String),

    /// Counter store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for gatekeeper operations.
pub type Result<T> = std::result::Result<T, GateError>;
