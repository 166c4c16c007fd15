//! Action-dispatching state stores hosted by a worker.
//!
//! A [`StateWorker`] owns every deployed store. Handlers deploy a store by
//! naming its kind in a [`Manifest`], then [`dispatch`](StateHandler::dispatch)
//! [`Action`]s against it; the worker runs the matching behavior from its
//! [`Catalog`] and replaces the state with the result.
//!
//! Durable stores are shared by every connection, persisted through a
//! [`Driver`], and published onto every connected bus. Transient stores
//! belong to one connection and are never persisted.
//!
//! Actions reach the outside world only through [`Effects`], resolved by
//! name at call time and bound to the calling connection.

mod catalog;
mod config;
mod driver;
mod effect;
mod error;
mod handler;
mod http_effect;
mod memory;
mod persistence;
mod store;
mod worker;

pub use catalog::Catalog;
pub use config::{DispatchOrdering, StateConfig};
pub use driver::{Driver, DriverError};
pub use effect::{Effect, EffectScope, EffectSpec, Effects, RelayEffect, SharedEffect};
pub use error::{Result, StateError};
pub use handler::StateHandler;
pub use http_effect::{
    http_effect_spec, HttpEffect, HttpRequest, HttpResponse, Method, HTTP_EFFECT_KIND,
};
pub use memory::MemoryDriver;
pub use persistence::Persistence;
pub use store::{Action, ErasedStore, Manifest, SharedStore, Store, SCHEMA_VERSION};
pub use worker::{ConnectionId, StateLink, StateWorker};
