//! Hierarchical publish/subscribe bus.
//!
//! A [`BusWorker`] owns a registry of handle -> stream entries. Reading a
//! handle yields the merged notifications of every entry at or below it, and
//! the set of merged entries follows the registry as entries are published,
//! replaced, and finish.
//!
//! # Example
//!
//! ```rust
//! use futures_util::{stream, StreamExt};
//! use serde_json::json;
//! use statebus_bus::BusHandler;
//! use statebus_core::handle;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> statebus_bus::Result<()> {
//! let bus = BusHandler::default();
//! let mut all = bus.observe(&handle!("a")).await?;
//!
//! bus.publish(&handle!("a.b.c"), stream::iter(vec![Ok(json!(1))])).await?;
//!
//! let first = all.next().await.expect("notification");
//! assert_eq!(first.handle, handle!("a.b.c"));
//! # Ok(())
//! # }
//! ```

mod config;
mod duplex;
mod error;
mod handler;
mod observer;
mod replay;
mod worker;

pub use config::BusConfig;
pub use duplex::Duplex;
pub use error::{BusError, Result};
pub use handler::BusHandler;
pub use worker::{BusLink, BusWorker, NotificationStream};
