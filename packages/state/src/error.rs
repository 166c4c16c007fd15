//! Error types for the state engine.

use statebus_bus::BusError;
use statebus_core::{Handle, HandleError};
use thiserror::Error;

use crate::driver::DriverError;

/// Errors that can occur deploying, dispatching, or persisting stores.
#[derive(Debug, Error)]
pub enum StateError {
    /// Nothing is deployed at the handle.
    #[error("nothing deployed at {0}")]
    NotDeployed(Handle),

    /// The deployed manifest has no such action.
    #[error("unknown action '{action}' for store at {handle}")]
    UnknownAction { handle: Handle, action: String },

    /// The worker's catalog has no store of this kind.
    #[error("unknown store kind: {0}")]
    UnknownKind(String),

    /// No effect is implanted under this locate name, or the catalog has no
    /// effect of the requested kind.
    #[error("unknown effect: {0}")]
    UnknownEffect(String),

    /// Shared actions disagree with the deployed or cataloged signatures.
    #[error("conflicting store at {handle}: actions {actions:?} differ")]
    Conflict { handle: Handle, actions: Vec<String> },

    /// A different store kind is already deployed at the handle.
    #[error("conflicting store at {handle}: '{deployed}' is deployed, got '{incoming}'")]
    KindConflict {
        handle: Handle,
        deployed: String,
        incoming: String,
    },

    /// A different effect is already implanted under the locate name.
    #[error("conflicting effect at '{locate}'")]
    EffectConflict { locate: String },

    /// A message was built against another schema version.
    #[error("schema mismatch: expected v{expected}, got v{found}")]
    Schema { expected: u32, found: u32 },

    /// An action panicked instead of returning a state.
    #[error("action '{action}' panicked on store at {handle}")]
    Panicked { handle: Handle, action: String },

    /// An effect failed while running.
    #[error("effect '{locate}' failed: {message}")]
    Effect { locate: String, message: String },

    /// Wiring was attempted outside a supported host context.
    #[error("unsupported environment: {0}")]
    Environment(String),

    /// The state worker has shut down.
    #[error("state worker closed")]
    WorkerClosed,

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("handle error: {0}")]
    Handle(#[from] HandleError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type alias for state operations.
pub type Result<T> = std::result::Result<T, StateError>;
