//! Error types for the bus.

use statebus_core::HandleError;
use thiserror::Error;

/// Errors that can occur talking to a bus worker.
#[derive(Debug, Error)]
pub enum BusError {
    /// The handle was malformed or too shallow to publish on.
    #[error("handle error: {0}")]
    Handle(#[from] HandleError),

    /// The bus worker has shut down.
    #[error("bus worker closed")]
    WorkerClosed,

    /// Wiring was attempted outside a supported host context.
    #[error("unsupported environment: {0}")]
    Environment(String),
}

/// Result type alias for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
