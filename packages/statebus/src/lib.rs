//! Statebus: a hierarchical pub/sub bus and the state stores that publish onto it.
//!
//! This crate re-exports the layered packages:
//!
//! - [`core`]: handles and notifications
//! - [`bus`]: the publish/subscribe worker and its handlers
//! - [`state`]: deployable stores, actions, effects, and persistence
//!
//! The most common types are also available from the crate root.

pub use statebus_bus as bus;
pub use statebus_core as core;
pub use statebus_state as state;

pub use statebus_bus::{BusConfig, BusHandler, Duplex};
pub use statebus_core::{handle, Handle, Notification, Signal, Value};
pub use statebus_state::{
    Action, Catalog, Effects, Manifest, MemoryDriver, StateConfig, StateError, StateHandler,
    Store,
};
