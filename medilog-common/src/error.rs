//! Common error types for medilog

use crate::quota::DenyReason;
use thiserror::Error;

/// Common result type for medilog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the medilog services
///
/// Pure computations (maintenance status, quota policy, token decoding) never
/// produce these; they return tagged enums instead. This taxonomy covers the
/// I/O-bound surface: subscriptions, store writes, and request handling.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Live subscription failed to establish or dropped
    #[error("Sync error: {0}")]
    Sync(String),

    /// Remote store rejected a mutation
    #[error("Write failure: {0}")]
    WriteFailure(String),

    /// Scanned text contained no identifiable token
    #[error("Decode failure: no identifier in scanned text")]
    DecodeFailure,

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Asset creation refused by the quota policy
    #[error("Quota denied: {0}")]
    QuotaDenied(DenyReason),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error (corrupt row, invariant violation)
    #[error("Internal error: {0}")]
    Internal(String),
}
