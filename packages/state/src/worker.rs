//! The state worker: deploys stores, dispatches actions, and keeps durable
//! state persisted and fanned out to every connected bus.
//!
//! Like the bus worker it is a single tokio task owning all of its
//! registries. Actions run in their own tasks so effects can call back into
//! the worker; their results come back as settle messages.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use statebus_bus::BusLink;
use statebus_core::{Handle, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::config::{DispatchOrdering, StateConfig};
use crate::driver::Driver;
use crate::effect::{EffectScope, EffectSpec, Effects, SharedEffect};
use crate::error::{Result, StateError};
use crate::persistence::Persistence;
use crate::store::{Action, ErasedStore, Manifest, SharedStore, SCHEMA_VERSION};

/// Identifies one connection to a state worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum Command {
    Connect {
        bus: Option<BusLink>,
        resp: oneshot::Sender<ConnectionId>,
    },
    Disconnect {
        connection: ConnectionId,
        resp: oneshot::Sender<()>,
    },
    Deploy {
        connection: ConnectionId,
        handle: Handle,
        manifest: Manifest,
        state: Value,
        transient: bool,
        resp: Reply<()>,
    },
    Dispatch {
        connection: ConnectionId,
        handle: Handle,
        action: Action,
        resp: Reply<Value>,
    },
    State {
        connection: ConnectionId,
        handle: Handle,
        resp: Reply<Value>,
    },
    Deprecate {
        connection: ConnectionId,
        handle: Handle,
        resp: Reply<()>,
    },
    Implant {
        locate: String,
        spec: EffectSpec,
        resp: Reply<()>,
    },
    Invalidate {
        locate: String,
        resp: oneshot::Sender<()>,
    },
    Effect {
        locate: String,
        resp: Reply<SharedEffect>,
    },
    Handles {
        resp: oneshot::Sender<Vec<Handle>>,
    },
    Clear {
        resp: Reply<usize>,
    },
}

/// Cloneable connection to a running state worker.
///
/// Calls name the connection they act for explicitly; [`StateHandler`]
/// wraps a link together with one connection.
///
/// [`StateHandler`]: crate::StateHandler
#[derive(Clone)]
pub struct StateLink {
    commands: mpsc::Sender<Command>,
}

impl fmt::Debug for StateLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateLink")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl StateLink {
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (resp, rx) = oneshot::channel();
        self.commands
            .send(command(resp))
            .await
            .map_err(|_| StateError::WorkerClosed)?;
        rx.await.map_err(|_| StateError::WorkerClosed)
    }

    /// Register a connection. Every durable store is published onto `bus`
    /// right away, and every later one as it is deployed. Connections may
    /// share a bus; each store is published on it once.
    pub async fn connect(&self, bus: Option<BusLink>) -> Result<ConnectionId> {
        self.request(|resp| Command::Connect { bus, resp }).await
    }

    /// Drop a connection and its transient stores.
    pub async fn disconnect(&self, connection: ConnectionId) -> Result<()> {
        self.request(|resp| Command::Disconnect { connection, resp })
            .await
    }

    /// Deploy a store described by `manifest` at `handle`.
    pub async fn deploy(
        &self,
        connection: ConnectionId,
        handle: &Handle,
        manifest: Manifest,
        state: Value,
        transient: bool,
    ) -> Result<()> {
        handle.ensure_mountable()?;
        let handle = handle.clone();
        self.request(|resp| Command::Deploy {
            connection,
            handle,
            manifest,
            state,
            transient,
            resp,
        })
        .await?
    }

    /// Run `action` against the store at `handle` and return the new state.
    pub async fn dispatch(
        &self,
        connection: ConnectionId,
        handle: &Handle,
        action: Action,
    ) -> Result<Value> {
        let handle = handle.clone();
        self.request(|resp| Command::Dispatch {
            connection,
            handle,
            action,
            resp,
        })
        .await?
    }

    /// Current state of the store at `handle`.
    pub async fn state(&self, connection: ConnectionId, handle: &Handle) -> Result<Value> {
        let handle = handle.clone();
        self.request(|resp| Command::State {
            connection,
            handle,
            resp,
        })
        .await?
    }

    /// Complete and remove the store at `handle`, clearing its persisted
    /// record if it is durable.
    pub async fn deprecate(&self, connection: ConnectionId, handle: &Handle) -> Result<()> {
        let handle = handle.clone();
        self.request(|resp| Command::Deprecate {
            connection,
            handle,
            resp,
        })
        .await?
    }

    /// Implant an effect under `locate`.
    pub async fn implant(&self, locate: &str, spec: EffectSpec) -> Result<()> {
        let locate = locate.to_string();
        self.request(|resp| Command::Implant { locate, spec, resp })
            .await?
    }

    /// Remove the effect under `locate`. Unknown names are ignored.
    pub async fn invalidate(&self, locate: &str) -> Result<()> {
        let locate = locate.to_string();
        self.request(|resp| Command::Invalidate { locate, resp })
            .await
    }

    /// Handles of every durable store currently deployed.
    pub async fn handles(&self) -> Result<Vec<Handle>> {
        self.request(|resp| Command::Handles { resp }).await
    }

    /// Remove every persisted record of the worker's namespace version.
    pub async fn clear(&self) -> Result<usize> {
        self.request(|resp| Command::Clear { resp }).await?
    }

    pub(crate) async fn effect(&self, locate: &str) -> Result<SharedEffect> {
        let locate = locate.to_string();
        self.request(|resp| Command::Effect { locate, resp }).await?
    }

    /// True once the worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Where a deployment lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Durable,
    Transient(ConnectionId),
}

struct Pending {
    connection: ConnectionId,
    action: Action,
    resp: Reply<Value>,
}

struct Deployment {
    id: u64,
    store: SharedStore,
    manifest: Manifest,
    state: watch::Sender<Value>,
    persister: Option<JoinHandle<()>>,
    busy: bool,
    queue: VecDeque<Pending>,
}

impl Deployment {
    /// Fail every queued dispatch.
    fn abandon(&mut self, handle: &Handle) {
        for pending in self.queue.drain(..) {
            let _ = pending.resp.send(Err(StateError::NotDeployed(handle.clone())));
        }
    }
}

struct Connection {
    bus: Option<u64>,
}

/// What the worker publishes at one handle of a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Durable(u64),
    Transient(ConnectionId, u64),
}

/// A bus worker one or more connections are wired to.
///
/// Durable stores are published once per bus. A transient store is
/// published only while its connection is the only one on the bus; it
/// then shadows a durable store at the same handle.
struct Bus {
    link: BusLink,
    connections: BTreeSet<ConnectionId>,
    published: BTreeMap<Handle, Source>,
}

struct Implanted {
    spec: EffectSpec,
    effect: SharedEffect,
}

struct Settled {
    location: Location,
    handle: Handle,
    deployment: u64,
    result: Result<Value>,
    resp: Reply<Value>,
}

/// Everything an action task needs to report back.
struct Runner<'a> {
    link: &'a mpsc::WeakSender<Command>,
    settled: &'a mpsc::UnboundedSender<Settled>,
}

impl Runner<'_> {
    fn start(
        &self,
        location: Location,
        handle: &Handle,
        deployment: &mut Deployment,
        pending: Pending,
    ) {
        let Some(commands) = self.link.upgrade() else {
            let _ = pending.resp.send(Err(StateError::WorkerClosed));
            return;
        };

        deployment.busy = true;
        let store = SharedStore::clone(&deployment.store);
        let state = deployment.state.borrow().clone();
        let effects = Effects::new(EffectScope::new(
            pending.connection,
            StateLink { commands },
        ));
        let settled = self.settled.clone();
        let handle = handle.clone();
        let id = deployment.id;
        let Pending { action, resp, .. } = pending;

        tokio::spawn(async move {
            let name = action.name.clone();
            debug!(%handle, action = %name, "running action");
            // A panicking action still settles, so serialized queues drain.
            let running = tokio::spawn(async move { store.reduce(state, action, &effects).await });
            let result = match running.await {
                Ok(result) => result,
                Err(e) => {
                    error!(%handle, action = %name, error = %e, "action panicked");
                    Err(StateError::Panicked {
                        handle: handle.clone(),
                        action: name,
                    })
                }
            };
            let _ = settled.send(Settled {
                location,
                handle,
                deployment: id,
                result,
                resp,
            });
        });
    }
}

/// The state worker.
///
/// Use [`StateWorker::spawn`] to start one; it stops when every
/// [`StateLink`] to it has been dropped and no action is running.
pub struct StateWorker {
    config: StateConfig,
    catalog: Catalog,
    persistence: Persistence,
    connections: HashMap<ConnectionId, Connection>,
    buses: BTreeMap<u64, Bus>,
    next_bus: u64,
    durable: BTreeMap<Handle, Deployment>,
    transient: HashMap<ConnectionId, BTreeMap<Handle, Deployment>>,
    effects: BTreeMap<String, Implanted>,
    next_deployment: u64,
    commands: mpsc::Receiver<Command>,
    link: mpsc::WeakSender<Command>,
    settled_tx: mpsc::UnboundedSender<Settled>,
    settled_rx: mpsc::UnboundedReceiver<Settled>,
}

impl StateWorker {
    /// Spawn a state worker on the current tokio runtime.
    ///
    /// Fails with [`StateError::Environment`] when called outside a runtime.
    pub fn spawn<D>(config: StateConfig, catalog: Catalog, driver: D) -> Result<StateLink>
    where
        D: Driver + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StateError::Environment(e.to_string()))?;

        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();
        let persistence = Persistence::new(Arc::new(driver), &config.namespace, config.version);

        let worker = Self {
            config,
            catalog,
            persistence,
            connections: HashMap::new(),
            buses: BTreeMap::new(),
            next_bus: 0,
            durable: BTreeMap::new(),
            transient: HashMap::new(),
            effects: BTreeMap::new(),
            next_deployment: 0,
            commands: rx,
            link: tx.downgrade(),
            settled_tx,
            settled_rx,
        };
        runtime.spawn(worker.run());

        Ok(StateLink { commands: tx })
    }

    async fn run(mut self) {
        info!(
            namespace = %self.config.namespace,
            version = self.config.version,
            ordering = ?self.config.ordering,
            "state worker started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(settled) = self.settled_rx.recv() => self.settle(settled),
            }
        }

        self.transient.clear();
        let persisters: Vec<JoinHandle<()>> = std::mem::take(&mut self.durable)
            .into_values()
            .filter_map(|mut deployment| deployment.persister.take())
            .collect();
        for persister in persisters {
            let _ = persister.await;
        }
        info!("state worker stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Connect { bus, resp } => {
                let connection = self.connect(bus).await;
                let _ = resp.send(connection);
            }
            Command::Disconnect { connection, resp } => {
                self.disconnect(connection).await;
                let _ = resp.send(());
            }
            Command::Deploy {
                connection,
                handle,
                manifest,
                state,
                transient,
                resp,
            } => {
                let result = self
                    .deploy(connection, handle, manifest, state, transient)
                    .await;
                let _ = resp.send(result);
            }
            Command::Dispatch {
                connection,
                handle,
                action,
                resp,
            } => {
                let pending = Pending {
                    connection,
                    action,
                    resp,
                };
                self.dispatch(handle, pending);
            }
            Command::State {
                connection,
                handle,
                resp,
            } => {
                let result = self
                    .find(connection, &handle)
                    .map(|(_, deployment)| deployment.state.borrow().clone())
                    .ok_or(StateError::NotDeployed(handle));
                let _ = resp.send(result);
            }
            Command::Deprecate {
                connection,
                handle,
                resp,
            } => {
                let result = self.deprecate(connection, handle).await;
                let _ = resp.send(result);
            }
            Command::Implant { locate, spec, resp } => {
                let _ = resp.send(self.implant(locate, spec));
            }
            Command::Invalidate { locate, resp } => {
                if self.effects.remove(&locate).is_some() {
                    debug!(%locate, "invalidated effect");
                }
                let _ = resp.send(());
            }
            Command::Effect { locate, resp } => {
                let result = self
                    .effects
                    .get(&locate)
                    .map(|implanted| SharedEffect::clone(&implanted.effect))
                    .ok_or(StateError::UnknownEffect(locate));
                let _ = resp.send(result);
            }
            Command::Handles { resp } => {
                let _ = resp.send(self.durable.keys().cloned().collect());
            }
            Command::Clear { resp } => {
                let _ = resp.send(self.persistence.clear().await);
            }
        }
    }

    async fn connect(&mut self, bus: Option<BusLink>) -> ConnectionId {
        let connection = ConnectionId::new();
        let bus = bus.map(|link| self.join_bus(connection, link));
        self.connections.insert(connection, Connection { bus });
        info!(%connection, "connection registered");
        if let Some(key) = bus {
            self.sync_bus(key).await;
        }
        connection
    }

    async fn disconnect(&mut self, connection: ConnectionId) {
        let Some(Connection { bus }) = self.connections.remove(&connection) else {
            return;
        };
        if let Some(deployments) = self.transient.remove(&connection) {
            for (handle, mut deployment) in deployments {
                self.forget(Source::Transient(connection, deployment.id), &handle);
                deployment.abandon(&handle);
            }
        }
        if let Some(key) = bus {
            if let Some(bus) = self.buses.get_mut(&key) {
                bus.connections.remove(&connection);
            }
            self.sync_bus(key).await;
        }
        info!(%connection, "connection dropped");
    }

    /// Register `connection` on the bus behind `link`, reusing the entry of
    /// a bus other connections already share.
    fn join_bus(&mut self, connection: ConnectionId, link: BusLink) -> u64 {
        self.buses
            .retain(|_, bus| !(bus.connections.is_empty() && bus.link.is_closed()));

        let known = self
            .buses
            .iter()
            .find(|(_, bus)| bus.link.same_worker(&link))
            .map(|(key, _)| *key);
        let key = known.unwrap_or_else(|| {
            let key = self.next_bus;
            self.next_bus += 1;
            self.buses.insert(
                key,
                Bus {
                    link,
                    connections: BTreeSet::new(),
                    published: BTreeMap::new(),
                },
            );
            key
        });
        if let Some(bus) = self.buses.get_mut(&key) {
            bus.connections.insert(connection);
        }
        key
    }

    /// What should be published at `handle` on `bus`.
    fn source(&self, bus: &Bus, handle: &Handle) -> Option<Source> {
        if bus.connections.len() == 1 {
            if let Some(connection) = bus.connections.first() {
                let transient = self
                    .transient
                    .get(connection)
                    .and_then(|deployments| deployments.get(handle));
                if let Some(deployment) = transient {
                    return Some(Source::Transient(*connection, deployment.id));
                }
            }
        }
        self.durable
            .get(handle)
            .map(|deployment| Source::Durable(deployment.id))
    }

    fn subscribe(&self, source: Source, handle: &Handle) -> Option<watch::Receiver<Value>> {
        let deployment = match source {
            Source::Durable(id) => self.durable.get(handle).filter(|d| d.id == id),
            Source::Transient(connection, id) => self
                .transient
                .get(&connection)
                .and_then(|deployments| deployments.get(handle))
                .filter(|d| d.id == id),
        };
        deployment.map(|deployment| deployment.state.subscribe())
    }

    /// Bring the publication at `handle` on bus `key` up to date.
    async fn sync(&mut self, key: u64, handle: &Handle) {
        let Some(bus) = self.buses.get(&key) else {
            return;
        };
        let desired = self.source(bus, handle);
        if bus.published.get(handle).copied() == desired {
            return;
        }
        let link = bus.link.clone();

        match desired {
            Some(source) => {
                let Some(state) = self.subscribe(source, handle) else {
                    return;
                };
                publish(&link, handle, state).await;
            }
            None => retract(&link, handle).await,
        }

        if let Some(bus) = self.buses.get_mut(&key) {
            match desired {
                Some(source) => bus.published.insert(handle.clone(), source),
                None => bus.published.remove(handle),
            };
        }
    }

    /// Sync every handle that is or could be published on bus `key`.
    async fn sync_bus(&mut self, key: u64) {
        let Some(bus) = self.buses.get(&key) else {
            return;
        };
        let mut handles: BTreeSet<Handle> = self.durable.keys().cloned().collect();
        handles.extend(bus.published.keys().cloned());
        for connection in &bus.connections {
            if let Some(deployments) = self.transient.get(connection) {
                handles.extend(deployments.keys().cloned());
            }
        }
        for handle in handles {
            self.sync(key, &handle).await;
        }
    }

    /// Sync `handle` on every bus.
    async fn sync_all(&mut self, handle: &Handle) {
        let keys: Vec<u64> = self.buses.keys().copied().collect();
        for key in keys {
            self.sync(key, handle).await;
        }
    }

    /// Stop tracking publications of `source`; its stream completes on its
    /// own once the deployment is dropped.
    fn forget(&mut self, source: Source, handle: &Handle) {
        for bus in self.buses.values_mut() {
            if bus.published.get(handle) == Some(&source) {
                bus.published.remove(handle);
            }
        }
    }

    /// Connection-local deployment first, then the durable one.
    fn find(&self, connection: ConnectionId, handle: &Handle) -> Option<(Location, &Deployment)> {
        if let Some(deployment) = self
            .transient
            .get(&connection)
            .and_then(|deployments| deployments.get(handle))
        {
            return Some((Location::Transient(connection), deployment));
        }
        self.durable
            .get(handle)
            .map(|deployment| (Location::Durable, deployment))
    }

    async fn deploy(
        &mut self,
        connection: ConnectionId,
        handle: Handle,
        manifest: Manifest,
        state: Value,
        transient: bool,
    ) -> Result<()> {
        let existing = if transient {
            self.transient
                .get(&connection)
                .and_then(|deployments| deployments.get(&handle))
        } else {
            self.durable.get(&handle)
        };

        if let Some(deployed) = existing {
            if deployed.manifest.kind != manifest.kind {
                return Err(StateError::KindConflict {
                    handle,
                    deployed: deployed.manifest.kind.clone(),
                    incoming: manifest.kind,
                });
            }
            let actions = deployed.manifest.conflicts(&manifest);
            if !actions.is_empty() {
                return Err(StateError::Conflict { handle, actions });
            }
            debug!(%handle, transient, "already deployed");
            return Ok(());
        }

        let store = self.catalog.resolve_store(&handle, &manifest)?;
        let manifest = store.manifest();
        let id = self.next_deployment;
        self.next_deployment += 1;

        if transient {
            let Some(bus) = self.connections.get(&connection).map(|c| c.bus) else {
                return Err(StateError::InvalidArgument(format!(
                    "unknown connection {connection}"
                )));
            };
            let (tx, _) = watch::channel(state);
            info!(%handle, %connection, kind = %manifest.kind, "deployed transient store");
            self.transient.entry(connection).or_default().insert(
                handle.clone(),
                Deployment {
                    id,
                    store,
                    manifest,
                    state: tx,
                    persister: None,
                    busy: false,
                    queue: VecDeque::new(),
                },
            );
            if let Some(key) = bus {
                self.sync(key, &handle).await;
            }
            return Ok(());
        }

        let state = self
            .persistence
            .load(&handle, &manifest)
            .await?
            .unwrap_or(state);
        let (tx, rx) = watch::channel(state);

        let persister = tokio::spawn(persist(
            self.persistence.clone(),
            handle.clone(),
            manifest.clone(),
            rx,
        ));
        info!(%handle, kind = %manifest.kind, "deployed durable store");
        self.durable.insert(
            handle.clone(),
            Deployment {
                id,
                store,
                manifest,
                state: tx,
                persister: Some(persister),
                busy: false,
                queue: VecDeque::new(),
            },
        );
        self.sync_all(&handle).await;
        Ok(())
    }

    fn dispatch(&mut self, handle: Handle, pending: Pending) {
        if let Err(e) = pending.action.check_schema() {
            let _ = pending.resp.send(Err(e));
            return;
        }

        let Some((location, deployed)) = self.find(pending.connection, &handle) else {
            let _ = pending.resp.send(Err(StateError::NotDeployed(handle)));
            return;
        };
        if !deployed.manifest.has_action(&pending.action.name) {
            let _ = pending.resp.send(Err(StateError::UnknownAction {
                handle,
                action: pending.action.name,
            }));
            return;
        }

        let serialized = self.config.ordering == DispatchOrdering::Serialized;
        let runner = Runner {
            link: &self.link,
            settled: &self.settled_tx,
        };
        let deployment = match location {
            Location::Durable => self.durable.get_mut(&handle),
            Location::Transient(connection) => self
                .transient
                .get_mut(&connection)
                .and_then(|deployments| deployments.get_mut(&handle)),
        };
        let Some(deployment) = deployment else {
            return;
        };

        if serialized && deployment.busy {
            debug!(%handle, queued = deployment.queue.len() + 1, "dispatch queued");
            deployment.queue.push_back(pending);
            return;
        }
        runner.start(location, &handle, deployment, pending);
    }

    fn settle(&mut self, settled: Settled) {
        let Settled {
            location,
            handle,
            deployment: id,
            result,
            resp,
        } = settled;

        let serialized = self.config.ordering == DispatchOrdering::Serialized;
        let runner = Runner {
            link: &self.link,
            settled: &self.settled_tx,
        };
        let deployment = match location {
            Location::Durable => self.durable.get_mut(&handle),
            Location::Transient(connection) => self
                .transient
                .get_mut(&connection)
                .and_then(|deployments| deployments.get_mut(&handle)),
        };

        let Some(deployment) = deployment.filter(|deployment| deployment.id == id) else {
            debug!(%handle, "action finished after its store was removed");
            let _ = resp.send(result.and(Err(StateError::NotDeployed(handle))));
            return;
        };

        match result {
            Ok(state) => {
                deployment.state.send_replace(state.clone());
                let _ = resp.send(Ok(state));
            }
            Err(e) => {
                warn!(%handle, error = %e, "action failed");
                let _ = resp.send(Err(e));
            }
        }

        deployment.busy = false;
        if serialized {
            if let Some(next) = deployment.queue.pop_front() {
                runner.start(location, &handle, deployment, next);
            }
        }
    }

    async fn deprecate(&mut self, connection: ConnectionId, handle: Handle) -> Result<()> {
        let Some((location, _)) = self.find(connection, &handle) else {
            return Err(StateError::NotDeployed(handle));
        };

        let removed = match location {
            Location::Durable => self.durable.remove(&handle),
            Location::Transient(connection) => self
                .transient
                .get_mut(&connection)
                .and_then(|deployments| deployments.remove(&handle)),
        };
        let Some(mut deployment) = removed else {
            return Err(StateError::NotDeployed(handle));
        };

        let source = match location {
            Location::Durable => Source::Durable(deployment.id),
            Location::Transient(connection) => Source::Transient(connection, deployment.id),
        };
        self.forget(source, &handle);
        deployment.abandon(&handle);
        let persister = deployment.persister.take();
        // Dropping the sender completes the state on every bus it was on.
        drop(deployment);

        match location {
            Location::Durable => self.sync_all(&handle).await,
            Location::Transient(connection) => {
                let bus = self.connections.get(&connection).and_then(|c| c.bus);
                if let Some(key) = bus {
                    self.sync(key, &handle).await;
                }
            }
        }

        if let Some(persister) = persister {
            // Let the last pending write land before removing the record.
            let _ = persister.await;
            self.persistence.remove(&handle).await?;
        }
        info!(%handle, ?location, "deprecated store");
        Ok(())
    }

    fn implant(&mut self, locate: String, spec: EffectSpec) -> Result<()> {
        if spec.schema != SCHEMA_VERSION {
            return Err(StateError::Schema {
                expected: SCHEMA_VERSION,
                found: spec.schema,
            });
        }
        if let Some(implanted) = self.effects.get(&locate) {
            if implanted.spec == spec {
                return Ok(());
            }
            return Err(StateError::EffectConflict { locate });
        }

        let effect = self.catalog.resolve_effect(&locate, &spec)?;
        info!(%locate, kind = %spec.kind, "implanted effect");
        self.effects.insert(locate, Implanted { spec, effect });
        Ok(())
    }
}

/// Publish a state onto a bus until the state's deployment is removed.
async fn publish(bus: &BusLink, handle: &Handle, state: watch::Receiver<Value>) {
    let stream = WatchStream::new(state).map(Ok).boxed();
    if let Err(e) = bus.set(handle, stream).await {
        warn!(%handle, error = %e, "failed to publish state onto bus");
    }
}

/// End whatever is published at `handle` on a bus.
async fn retract(bus: &BusLink, handle: &Handle) {
    if let Err(e) = bus.set(handle, stream::empty().boxed()).await {
        warn!(%handle, error = %e, "failed to retract state from bus");
    }
}

/// Write-behind persister: always writes the newest state, skipping
/// intermediate ones while a write is in progress.
async fn persist(
    persistence: Persistence,
    handle: Handle,
    manifest: Manifest,
    mut state: watch::Receiver<Value>,
) {
    while state.changed().await.is_ok() {
        let value = state.borrow_and_update().clone();
        if let Err(e) = persistence.save(&handle, &manifest, &value).await {
            error!(%handle, error = %e, "failed to persist state");
        }
    }
    debug!(%handle, "persister stopped");
}
