//! The bus worker: owns handle -> stream registrations and serves
//! hierarchical reads.
//!
//! The worker runs as a single tokio task. Links talk to it over a bounded
//! command channel; each `set` gets a pump task feeding the entry's replay
//! channel, and each `get` gets an observer task (see `observer`) that the
//! worker announces matching entries to.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures_util::StreamExt;
use statebus_core::{Handle, Notification, Publication};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::observer::{self, Join};
use crate::replay::Replay;

/// Stream of notifications returned by [`BusLink::get`].
pub type NotificationStream = ReceiverStream<Notification>;

pub(crate) enum Command {
    Get {
        handle: Handle,
        resp: oneshot::Sender<mpsc::Receiver<Notification>>,
    },
    Set {
        handle: Handle,
        publication: Publication,
        resp: oneshot::Sender<()>,
    },
}

/// Cloneable connection to a running bus worker.
///
/// This is the RPC surface of the bus: `get` and `set`. Every call is
/// asynchronous and fails with [`BusError::WorkerClosed`] once the worker is
/// gone.
#[derive(Clone)]
pub struct BusLink {
    commands: mpsc::Sender<Command>,
}

impl fmt::Debug for BusLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusLink")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl BusLink {
    /// Observe `handle` and every handle below it.
    ///
    /// The returned stream never ends because a member completed; it ends
    /// only when the worker shuts down and all members have drained.
    pub async fn get(&self, handle: &Handle) -> Result<NotificationStream> {
        let (resp, rx) = oneshot::channel();
        self.commands
            .send(Command::Get {
                handle: handle.clone(),
                resp,
            })
            .await
            .map_err(|_| BusError::WorkerClosed)?;
        let receiver = rx.await.map_err(|_| BusError::WorkerClosed)?;
        Ok(ReceiverStream::new(receiver))
    }

    /// Publish `publication` under `handle`, replacing any prior entry.
    pub async fn set(&self, handle: &Handle, publication: Publication) -> Result<()> {
        handle.ensure_mountable()?;
        let (resp, rx) = oneshot::channel();
        self.commands
            .send(Command::Set {
                handle: handle.clone(),
                publication,
                resp,
            })
            .await
            .map_err(|_| BusError::WorkerClosed)?;
        rx.await.map_err(|_| BusError::WorkerClosed)
    }

    /// True once the worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// True if both links talk to the same worker.
    pub fn same_worker(&self, other: &BusLink) -> bool {
        self.commands.same_channel(&other.commands)
    }
}

/// A registered entry.
struct Entry {
    id: u64,
    replay: Arc<Replay>,
    pump: JoinHandle<()>,
}

/// A live `get`.
struct Observer {
    prefix: Handle,
    joins: mpsc::UnboundedSender<Join>,
}

impl Observer {
    /// Subscribe this observer to the entry `id` if it lives under its
    /// prefix. Returns false once the observer has stopped.
    fn announce(&self, handle: &Handle, id: u64, replay: &Replay) -> bool {
        if self.joins.is_closed() {
            return false;
        }
        if !self.prefix.contains(handle) {
            return true;
        }
        self.joins
            .send(Join {
                handle: handle.clone(),
                id,
                subscription: replay.subscribe(),
            })
            .is_ok()
    }
}

/// The bus worker.
///
/// Use [`BusWorker::spawn`] to start one; the worker stops when every
/// [`BusLink`] to it has been dropped.
pub struct BusWorker {
    config: BusConfig,
    entries: BTreeMap<Handle, Entry>,
    next_id: u64,
    observers: Vec<Observer>,
    commands: mpsc::Receiver<Command>,
    settled_tx: mpsc::UnboundedSender<(Handle, u64)>,
    settled_rx: mpsc::UnboundedReceiver<(Handle, u64)>,
}

impl BusWorker {
    /// Spawn a bus worker on the current tokio runtime.
    ///
    /// Fails with [`BusError::Environment`] when called outside a runtime.
    pub fn spawn(config: BusConfig) -> Result<BusLink> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BusError::Environment(e.to_string()))?;

        let (worker, link) = Self::new(config);
        runtime.spawn(worker.run());
        Ok(link)
    }

    fn new(config: BusConfig) -> (Self, BusLink) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();

        let worker = Self {
            config,
            entries: BTreeMap::new(),
            next_id: 0,
            observers: Vec::new(),
            commands: rx,
            settled_tx,
            settled_rx,
        };
        (worker, BusLink { commands: tx })
    }

    async fn run(mut self) {
        info!("bus worker started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some((handle, id)) = self.settled_rx.recv() => self.settle(handle, id),
            }
        }

        for (_, entry) in std::mem::take(&mut self.entries) {
            entry.pump.abort();
        }
        self.observers.clear();
        info!("bus worker stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Get { handle, resp } => {
                self.observers.retain(|observer| !observer.joins.is_closed());

                let (tx, rx) = mpsc::channel(self.config.observer_capacity.max(1));
                let (joins, joins_rx) = mpsc::unbounded_channel();
                let observer = Observer {
                    prefix: handle.clone(),
                    joins,
                };
                for (entry_handle, entry) in &self.entries {
                    observer.announce(entry_handle, entry.id, &entry.replay);
                }
                tokio::spawn(observer::run(handle.clone(), joins_rx, tx));
                self.observers.push(observer);
                debug!(%handle, observers = self.observers.len(), "observer attached");
                let _ = resp.send(rx);
            }
            Command::Set {
                handle,
                publication,
                resp,
            } => {
                self.set(handle, publication);
                let _ = resp.send(());
            }
        }
    }

    fn set(&mut self, handle: Handle, publication: Publication) {
        let id = self.next_id;
        self.next_id += 1;

        let replay = Arc::new(Replay::new(
            self.config.replay_capacity,
            self.config.observer_capacity,
        ));
        // Observers subscribe before the pump starts, so they see every
        // notification of the entry.
        self.observers
            .retain(|observer| observer.announce(&handle, id, &replay));

        let pump = tokio::spawn(pump(
            handle.clone(),
            id,
            publication,
            Arc::clone(&replay),
            self.settled_tx.clone(),
        ));

        let entry = Entry { id, replay, pump };
        if let Some(previous) = self.entries.insert(handle.clone(), entry) {
            previous.pump.abort();
            debug!(%handle, "replaced published entry");
        } else {
            debug!(%handle, "published entry");
        }
    }

    /// Remove an entry whose upstream ended, unless it was already replaced.
    fn settle(&mut self, handle: Handle, id: u64) {
        if self
            .entries
            .get(&handle)
            .is_some_and(|entry| entry.id == id)
        {
            self.entries.remove(&handle);
            debug!(%handle, "removed finished entry");
        }
    }
}

/// Materialize `publication` into the entry's replay channel.
async fn pump(
    handle: Handle,
    id: u64,
    mut publication: Publication,
    replay: Arc<Replay>,
    settled: mpsc::UnboundedSender<(Handle, u64)>,
) {
    let mut failed = false;
    while let Some(item) = publication.next().await {
        match item {
            Ok(value) => replay.push(Notification::next(handle.clone(), value)).await,
            Err(error) => {
                replay.push(Notification::error(handle.clone(), error)).await;
                failed = true;
                break;
            }
        }
    }
    if !failed {
        replay.push(Notification::complete(handle.clone())).await;
    }
    drop(replay);
    let _ = settled.send((handle, id));
}
