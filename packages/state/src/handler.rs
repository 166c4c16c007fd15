//! Client-facing proxy to a state worker.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use statebus_bus::{BusHandler, NotificationStream};
use statebus_core::{Handle, Value};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::catalog::Catalog;
use crate::config::StateConfig;
use crate::driver::Driver;
use crate::effect::EffectSpec;
use crate::error::{Result, StateError};
use crate::store::{Action, Manifest, Store};
use crate::worker::{ConnectionId, StateLink, StateWorker};

/// One connection to a state worker, optionally wired to a bus.
///
/// The connection is registered on first use. When a [`BusHandler`] is
/// given, every store visible to this connection is published onto that bus
/// under its handle, so its state can be observed with
/// [`StateHandler::observe`]. Clones share the connection.
///
/// # Example
///
/// ```rust,ignore
/// let link = StateWorker::spawn(StateConfig::default(), catalog, MemoryDriver::new())?;
/// let state = StateHandler::new(link, Some(BusHandler::default()));
///
/// state.deploy::<Counter>(&handle!("app.counter.main"), Count { count: 0 }).await?;
/// let next: Count = state.dispatch_as(&handle!("app.counter.main"), Action::new("increment")).await?;
/// ```
#[derive(Clone, Debug)]
pub struct StateHandler {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    link: StateLink,
    bus: Option<BusHandler>,
    connection: OnceCell<ConnectionId>,
}

impl StateHandler {
    pub fn new(link: StateLink, bus: Option<BusHandler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                link,
                bus,
                connection: OnceCell::new(),
            }),
        }
    }

    /// Spawn a worker and connect to it.
    pub fn spawn<D>(
        config: StateConfig,
        catalog: Catalog,
        driver: D,
        bus: Option<BusHandler>,
    ) -> Result<Self>
    where
        D: Driver + 'static,
    {
        let link = StateWorker::spawn(config, catalog, driver)?;
        Ok(Self::new(link, bus))
    }

    /// A second, independent connection to the same worker and bus.
    ///
    /// Transient stores are only published on a bus that carries a single
    /// connection, so the connections sharing this bus observe durable
    /// stores only.
    pub fn new_connection(&self) -> Self {
        Self::new(self.inner.link.clone(), self.inner.bus.clone())
    }

    pub fn link(&self) -> &StateLink {
        &self.inner.link
    }

    pub fn bus(&self) -> Option<&BusHandler> {
        self.inner.bus.as_ref()
    }

    /// This handler's connection, registering it if needed.
    pub async fn connection(&self) -> Result<ConnectionId> {
        let connection = self
            .inner
            .connection
            .get_or_try_init(|| async {
                let bus = match &self.inner.bus {
                    Some(bus) => Some(bus.link().await?.clone()),
                    None => None,
                };
                let connection = self.inner.link.connect(bus).await?;
                debug!(%connection, "state handler connected");
                Ok::<_, StateError>(connection)
            })
            .await?;
        Ok(*connection)
    }

    /// Deploy a durable store of type `S`.
    pub async fn deploy<S: Store>(&self, handle: &Handle, state: S::State) -> Result<()> {
        let state = serde_json::to_value(state)?;
        self.deploy_manifest(handle, S::manifest(), state, false)
            .await
    }

    /// Deploy a store of type `S` visible only to this connection.
    pub async fn deploy_transient<S: Store>(&self, handle: &Handle, state: S::State) -> Result<()> {
        let state = serde_json::to_value(state)?;
        self.deploy_manifest(handle, S::manifest(), state, true)
            .await
    }

    /// Deploy from a bare manifest.
    pub async fn deploy_manifest(
        &self,
        handle: &Handle,
        manifest: Manifest,
        state: Value,
        transient: bool,
    ) -> Result<()> {
        let connection = self.connection().await?;
        self.inner
            .link
            .deploy(connection, handle, manifest, state, transient)
            .await
    }

    pub async fn dispatch(&self, handle: &Handle, action: Action) -> Result<Value> {
        let connection = self.connection().await?;
        self.inner.link.dispatch(connection, handle, action).await
    }

    /// Dispatch and deserialize the new state.
    pub async fn dispatch_as<T: DeserializeOwned>(
        &self,
        handle: &Handle,
        action: Action,
    ) -> Result<T> {
        let value = self.dispatch(handle, action).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn state(&self, handle: &Handle) -> Result<Value> {
        let connection = self.connection().await?;
        self.inner.link.state(connection, handle).await
    }

    pub async fn state_as<T: DeserializeOwned>(&self, handle: &Handle) -> Result<T> {
        let value = self.state(handle).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn deprecate(&self, handle: &Handle) -> Result<()> {
        let connection = self.connection().await?;
        self.inner.link.deprecate(connection, handle).await
    }

    pub async fn implant(&self, locate: &str, spec: EffectSpec) -> Result<()> {
        self.inner.link.implant(locate, spec).await
    }

    pub async fn invalidate(&self, locate: &str) -> Result<()> {
        self.inner.link.invalidate(locate).await
    }

    /// Handles of every durable store currently deployed.
    pub async fn handles(&self) -> Result<Vec<Handle>> {
        self.inner.link.handles().await
    }

    /// Remove every persisted record of the worker's namespace version.
    pub async fn clear(&self) -> Result<usize> {
        self.inner.link.clear().await
    }

    /// Observe the states published under `handle` on this handler's bus.
    pub async fn observe(&self, handle: &Handle) -> Result<NotificationStream> {
        let bus = self.inner.bus.as_ref().ok_or_else(|| {
            StateError::InvalidArgument("state handler has no bus".to_string())
        })?;
        // States are published when the connection registers.
        self.connection().await?;
        Ok(bus.observe(handle).await?)
    }

    /// Deregister this handler's connection, dropping its transient stores.
    /// A later call registers a fresh connection only on a new handler.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(connection) = self.inner.connection.get() {
            self.inner.link.disconnect(*connection).await?;
        }
        Ok(())
    }
}
