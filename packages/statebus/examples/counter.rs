//! Counter example: one store, two connections, one bus.
//!
//! A durable counter is deployed by one connection and incremented by
//! another. A third party watches the `app.counter` subtree on the bus and
//! prints every state it sees, then the completion when the counter is
//! deprecated.
//!
//! Run with `RUST_LOG=debug` to see the workers' tracing output.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use statebus::state::Result;
use statebus::{
    handle, Action, BusHandler, Catalog, Effects, Manifest, MemoryDriver, Signal, StateConfig,
    StateError, StateHandler, Store,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Count {
    count: i64,
}

struct Counter;

#[async_trait]
impl Store for Counter {
    type State = Count;

    fn manifest() -> Manifest {
        Manifest::new("counter")
            .action("increment", "() -> Count")
            .action("add", "(by: i64) -> Count")
    }

    async fn reduce(&self, state: Count, action: Action, _effects: &Effects) -> Result<Count> {
        match action.name.as_str() {
            "increment" => Ok(Count {
                count: state.count + 1,
            }),
            "add" => Ok(Count {
                count: state.count + action.arg_as::<i64>(0)?,
            }),
            other => Err(StateError::InvalidArgument(format!("unhandled action {other}"))),
        }
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let bus = BusHandler::default();
    let catalog = Catalog::new().with_store(Counter);
    let alice = StateHandler::spawn(
        StateConfig::default(),
        catalog,
        MemoryDriver::new(),
        Some(bus.clone()),
    )?;
    let bob = alice.new_connection();

    let counter = handle!("app.counter.main");
    alice.deploy::<Counter>(&counter, Count { count: 0 }).await?;

    let mut watch = bob.observe(&handle!("app.counter")).await?;
    let watcher = tokio::spawn(async move {
        while let Some(notification) = watch.next().await {
            match &notification.signal {
                Signal::Next { value } => println!("{} -> {value}", notification.handle),
                Signal::Error { error } => println!("{} failed: {error}", notification.handle),
                Signal::Complete => {
                    println!("{} completed", notification.handle);
                    break;
                }
            }
        }
    });

    let next: Count = bob.dispatch_as(&counter, Action::new("increment")).await?;
    println!("bob incremented to {}", next.count);
    let next: Count = alice
        .dispatch_as(&counter, Action::new("add").arg(41)?)
        .await?;
    println!("alice added to {}", next.count);

    alice.deprecate(&counter).await?;
    watcher.await?;
    Ok(())
}
