//! Client-facing proxy to a bus worker.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use statebus_core::{Handle, Value};
use tokio::sync::OnceCell;

use crate::config::BusConfig;
use crate::duplex::Duplex;
use crate::error::Result;
use crate::worker::{BusLink, BusWorker, NotificationStream};

/// Proxy that forwards `observe`/`publish` to a bus worker.
///
/// The link is established on first use: either the one given to
/// [`BusHandler::attach`], or a freshly spawned worker. Clones share the
/// same link.
#[derive(Clone, Debug)]
pub struct BusHandler {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: BusConfig,
    link: OnceCell<BusLink>,
}

impl BusHandler {
    /// A handler that spawns its own worker with `config` on first use.
    pub fn new(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                link: OnceCell::new(),
            }),
        }
    }

    /// A handler bound to an already running worker.
    pub fn attach(link: BusLink) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: BusConfig::default(),
                link: OnceCell::from(link),
            }),
        }
    }

    /// The link to the worker, spawning it if needed.
    pub async fn link(&self) -> Result<&BusLink> {
        self.inner
            .link
            .get_or_try_init(|| async { BusWorker::spawn(self.inner.config.clone()) })
            .await
    }

    /// Observe `handle` and everything published below it.
    pub async fn observe(&self, handle: &Handle) -> Result<NotificationStream> {
        self.link().await?.get(handle).await
    }

    /// Publish `stream` under `handle`. Items are values or error messages;
    /// the first error ends the entry.
    pub async fn publish<S>(&self, handle: &Handle, stream: S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Value, String>> + Send + 'static,
    {
        self.link().await?.set(handle, stream.boxed()).await
    }

    /// Bind the publish and observe sides of `handle` together.
    pub async fn duplex(&self, handle: &Handle) -> Result<Duplex> {
        Duplex::open(self, handle).await
    }
}

impl Default for BusHandler {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}
