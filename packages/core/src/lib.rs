//! Core statebus types shared by the bus and the state engine.
//!
//! - `Handle`: validated dotted name identifying a mount point
//! - `Notification`: a materialized push event tagged with its origin
//! - `Publication`: the stream shape accepted by the bus
//!
//! # Example
//!
//! ```rust
//! use statebus_core::{handle, Notification};
//! use serde_json::json;
//!
//! let n = Notification::next(handle!("app.state.counter"), json!({"count": 1}));
//! assert!(handle!("app.state").contains(&n.handle));
//! ```

mod handle;
mod notification;

pub use handle::{Handle, HandleError, MIN_MOUNT_SEGMENTS};
pub use notification::{Notification, Signal};

pub use serde_json::Value;

/// A stream handed to the bus for publication.
///
/// `Ok` items become `next` notifications, an `Err` item becomes an `error`
/// notification and ends the stream, and the end of the stream becomes a
/// `complete` notification.
pub type Publication = futures_util::stream::BoxStream<'static, Result<Value, String>>;
