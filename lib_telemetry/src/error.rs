//! # Error Taxonomy
//!
//! Every fallible operation in the crate returns [`TelemetryError`]. Only
//! `StoreUnavailable` is transient: callers retry it on their next scheduled
//! attempt instead of escalating.

use thiserror::Error;

/// Errors produced by the store gateway, the fan-out path and configuration.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The store could not be reached or failed to answer a query.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    /// The store's validation gate refused a write.
    #[error("document failed validation: {0}")]
    ValidationRejected(String),
    /// A single viewer could not be delivered to and was torn down.
    #[error("viewer {viewer} unreachable: {reason}")]
    ViewerUnreachable {
        /// The broadcaster-assigned id of the viewer.
        viewer: u64,
        /// What went wrong with the delivery.
        reason: String,
    },
    /// A setting is missing or out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The logging pipeline could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),
}

impl TelemetryError {
    /// Whether the failure should simply be retried on the next scheduled attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, TelemetryError::StoreUnavailable(_))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TelemetryError>;
