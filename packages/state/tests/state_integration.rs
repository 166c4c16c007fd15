mod common;

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};

use statebus_bus::BusHandler;
use statebus_core::{handle, Signal};
use statebus_state::{
    Action, DispatchOrdering, Driver, Manifest, MemoryDriver, StateConfig, StateError,
    StateHandler, StateWorker, Store,
};

use common::{catalog, eventually, Count, Counter, Faulty, Journal, WAIT};

fn spawn(driver: &MemoryDriver) -> StateHandler {
    StateHandler::spawn(StateConfig::default(), catalog(), driver.clone(), None).unwrap()
}

#[test]
fn test_spawn_outside_runtime_fails() {
    let err =
        StateWorker::spawn(StateConfig::default(), catalog(), MemoryDriver::new()).unwrap_err();
    assert!(matches!(err, StateError::Environment(_)));
}

#[tokio::test]
async fn test_increment_twice() {
    let state = spawn(&MemoryDriver::new());
    let store = handle!("a.b.store");

    state.deploy::<Counter>(&store, Count { count: 0 }).await.unwrap();
    state.dispatch(&store, Action::new("increment")).await.unwrap();
    let last: Count = state
        .dispatch_as(&store, Action::new("increment"))
        .await
        .unwrap();

    assert_eq!(last, Count { count: 2 });
    assert_eq!(state.state(&store).await.unwrap(), json!({"count": 2}));
}

#[tokio::test]
async fn test_dispatch_with_arguments() {
    let state = spawn(&MemoryDriver::new());
    let store = handle!("a.b.store");
    state.deploy::<Counter>(&store, Count { count: 1 }).await.unwrap();

    let next: Count = state
        .dispatch_as(&store, Action::new("add").arg(41).unwrap())
        .await
        .unwrap();
    assert_eq!(next.count, 42);

    let err = state.dispatch(&store, Action::new("add")).await.unwrap_err();
    assert!(matches!(err, StateError::InvalidArgument(_)));
    // A failed action leaves the state alone.
    assert_eq!(state.state(&store).await.unwrap(), json!({"count": 42}));
}

#[tokio::test]
async fn test_deploy_is_idempotent() {
    let state = spawn(&MemoryDriver::new());
    let store = handle!("a.b.store");

    state.deploy::<Counter>(&store, Count { count: 5 }).await.unwrap();
    state.deploy::<Counter>(&store, Count { count: 0 }).await.unwrap();

    assert_eq!(state.state(&store).await.unwrap(), json!({"count": 5}));
    assert_eq!(state.handles().await.unwrap(), vec![store]);
}

#[tokio::test]
async fn test_conflicting_deploys_fail() {
    let state = spawn(&MemoryDriver::new());
    let store = handle!("a.b.store");
    state.deploy::<Counter>(&store, Count { count: 0 }).await.unwrap();

    let changed = Manifest::new("counter").action("increment", "(by: i64) -> Count");
    let err = state
        .deploy_manifest(&store, changed, json!({"count": 0}), false)
        .await
        .unwrap_err();
    match err {
        StateError::Conflict { handle, actions } => {
            assert_eq!(handle, store);
            assert_eq!(actions, vec!["increment".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = state
        .deploy::<Journal>(&store, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::KindConflict { .. }));
}

#[tokio::test]
async fn test_unknown_kind_and_shallow_handles_fail() {
    let state = spawn(&MemoryDriver::new());

    let err = state
        .deploy_manifest(&handle!("a.b.c"), Manifest::new("nope"), Value::Null, false)
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::UnknownKind(kind) if kind == "nope"));

    let err = state
        .deploy::<Counter>(&handle!("a.b"), Count { count: 0 })
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::Handle(_)));
}

#[tokio::test]
async fn test_dispatch_undeployed_names_the_handle() {
    let state = spawn(&MemoryDriver::new());
    let missing = handle!("a.b.missing");

    let err = state
        .dispatch(&missing, Action::new("increment"))
        .await
        .unwrap_err();
    assert!(matches!(&err, StateError::NotDeployed(h) if *h == missing));
    assert!(err.to_string().contains("a.b.missing"));

    let err = state.deprecate(&missing).await.unwrap_err();
    assert!(matches!(err, StateError::NotDeployed(_)));
}

#[tokio::test]
async fn test_unknown_action_and_schema_mismatch() {
    let state = spawn(&MemoryDriver::new());
    let store = handle!("a.b.store");
    state.deploy::<Counter>(&store, Count { count: 0 }).await.unwrap();

    let err = state
        .dispatch(&store, Action::new("explode"))
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::UnknownAction { action, .. } if action == "explode"));

    let mut action = Action::new("increment");
    action.schema = 2;
    let err = state.dispatch(&store, action).await.unwrap_err();
    assert!(matches!(err, StateError::Schema { found: 2, .. }));
}

#[tokio::test]
async fn test_durable_state_survives_redeploy() {
    let driver = MemoryDriver::new();
    let store = handle!("a.b.store");

    let first = spawn(&driver);
    first.deploy::<Counter>(&store, Count { count: 0 }).await.unwrap();
    first.dispatch(&store, Action::new("increment")).await.unwrap();

    // Same worker: the deployed state wins over the new initial state.
    first.deploy::<Counter>(&store, Count { count: 100 }).await.unwrap();
    assert_eq!(first.state(&store).await.unwrap(), json!({"count": 1}));

    // Wait for the write-behind persister.
    let key = "statebus.v1/a.b.store";
    eventually(|| {
        let driver = driver.clone();
        async move {
            driver
                .get_item(key)
                .await
                .unwrap()
                .is_some_and(|raw| raw.contains(r#""count":1"#))
        }
    })
    .await;

    // A fresh worker on the same storage loads the persisted state.
    let second = spawn(&driver);
    second.deploy::<Counter>(&store, Count { count: 100 }).await.unwrap();
    assert_eq!(second.state(&store).await.unwrap(), json!({"count": 1}));
}

#[tokio::test]
async fn test_stale_record_is_discarded() {
    let driver = MemoryDriver::with_entries([(
        "statebus.v1/a.b.store",
        r#"{"kind":"counter","actions":{"increment":"() -> Old"},"state":{"count":9}}"#,
    )]);
    let state = spawn(&driver);
    let store = handle!("a.b.store");

    state.deploy::<Counter>(&store, Count { count: 0 }).await.unwrap();
    assert_eq!(state.state(&store).await.unwrap(), json!({"count": 0}));
    assert!(driver.snapshot().is_empty());
}

#[tokio::test]
async fn test_deprecate_clears_persisted_record() {
    let driver = MemoryDriver::new();
    let state = spawn(&driver);
    let store = handle!("a.b.store");

    state.deploy::<Counter>(&store, Count { count: 0 }).await.unwrap();
    state.dispatch(&store, Action::new("increment")).await.unwrap();
    state.deprecate(&store).await.unwrap();

    assert!(driver.snapshot().is_empty());
    assert!(state.handles().await.unwrap().is_empty());
    assert!(matches!(
        state.state(&store).await,
        Err(StateError::NotDeployed(_))
    ));

    // Redeploying starts from the given state again.
    state.deploy::<Counter>(&store, Count { count: 7 }).await.unwrap();
    assert_eq!(state.state(&store).await.unwrap(), json!({"count": 7}));
}

#[tokio::test]
async fn test_transient_isolation() {
    let driver = MemoryDriver::new();
    let alice = spawn(&driver);
    let bob = alice.new_connection();
    let store = handle!("a.b.session");

    alice
        .deploy_transient::<Counter>(&store, Count { count: 0 })
        .await
        .unwrap();
    bob.deploy_transient::<Counter>(&store, Count { count: 10 })
        .await
        .unwrap();

    alice.dispatch(&store, Action::new("increment")).await.unwrap();
    alice.dispatch(&store, Action::new("increment")).await.unwrap();
    bob.dispatch(&store, Action::new("increment")).await.unwrap();

    assert_eq!(alice.state(&store).await.unwrap(), json!({"count": 2}));
    assert_eq!(bob.state(&store).await.unwrap(), json!({"count": 11}));

    // Transient stores are never persisted nor listed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(driver.snapshot().is_empty());
    assert!(alice.handles().await.unwrap().is_empty());

    // A third connection sees nothing.
    let carol = alice.new_connection();
    assert!(matches!(
        carol.state(&store).await,
        Err(StateError::NotDeployed(_))
    ));
}

#[tokio::test]
async fn test_disconnect_drops_transient_stores() {
    let state = spawn(&MemoryDriver::new());
    let store = handle!("a.b.session");
    state
        .deploy_transient::<Counter>(&store, Count { count: 0 })
        .await
        .unwrap();

    state.disconnect().await.unwrap();
    assert!(matches!(
        state.state(&store).await,
        Err(StateError::NotDeployed(_))
    ));
}

#[tokio::test]
async fn test_transient_shadows_durable() {
    let state = spawn(&MemoryDriver::new());
    let other = state.new_connection();
    let store = handle!("a.b.store");

    state.deploy::<Counter>(&store, Count { count: 0 }).await.unwrap();
    state
        .deploy_transient::<Counter>(&store, Count { count: 50 })
        .await
        .unwrap();

    state.dispatch(&store, Action::new("increment")).await.unwrap();
    assert_eq!(state.state(&store).await.unwrap(), json!({"count": 51}));
    assert_eq!(other.state(&store).await.unwrap(), json!({"count": 0}));
}

#[tokio::test]
async fn test_clear_removes_current_version_only() {
    let driver = MemoryDriver::with_entries([("statebus.v0/a.b.c", "{}"), ("unrelated", "x")]);
    let state = spawn(&driver);
    let store = handle!("a.b.store");

    state.deploy::<Counter>(&store, Count { count: 0 }).await.unwrap();
    state.dispatch(&store, Action::new("increment")).await.unwrap();
    eventually(|| {
        let driver = driver.clone();
        async move { driver.snapshot().contains_key("statebus.v1/a.b.store") }
    })
    .await;

    assert_eq!(state.clear().await.unwrap(), 1);
    let keys: Vec<_> = driver.snapshot().into_keys().collect();
    assert_eq!(keys, vec!["statebus.v0/a.b.c".to_string(), "unrelated".to_string()]);
}

#[tokio::test]
async fn test_durable_state_is_published_on_every_bus() {
    let link = StateWorker::spawn(StateConfig::default(), catalog(), MemoryDriver::new()).unwrap();
    let early = StateHandler::new(link.clone(), Some(BusHandler::default()));
    let store = handle!("app.counter.main");

    early.deploy::<Counter>(&store, Count { count: 0 }).await.unwrap();
    early.dispatch(&store, Action::new("increment")).await.unwrap();

    // A connection made later still gets the store on its own bus.
    let late = StateHandler::new(link, Some(BusHandler::default()));
    let mut observed = late.observe(&handle!("app.counter")).await.unwrap();

    let first = tokio::time::timeout(WAIT, observed.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.handle, store);
    assert_eq!(first.value(), Some(&json!({"count": 1})));

    early.dispatch(&store, Action::new("increment")).await.unwrap();
    let second = tokio::time::timeout(WAIT, observed.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.value(), Some(&json!({"count": 2})));

    // Deprecating completes the published state.
    early.deprecate(&store).await.unwrap();
    let last = tokio::time::timeout(WAIT, observed.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.signal, Signal::Complete);
}

#[tokio::test]
async fn test_transient_state_is_published_only_on_own_bus() {
    let link = StateWorker::spawn(StateConfig::default(), catalog(), MemoryDriver::new()).unwrap();
    let mine = StateHandler::new(link.clone(), Some(BusHandler::default()));
    let theirs = StateHandler::new(link, Some(BusHandler::default()));
    let store = handle!("app.session.cart");

    let mut my_view = mine.observe(&store).await.unwrap();
    let mut their_view = theirs.observe(&store).await.unwrap();

    mine.deploy_transient::<Counter>(&store, Count { count: 3 })
        .await
        .unwrap();

    let seen = tokio::time::timeout(WAIT, my_view.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.value(), Some(&json!({"count": 3})));

    let quiet = tokio::time::timeout(Duration::from_millis(100), their_view.next()).await;
    assert!(quiet.is_err());
}

#[tokio::test]
async fn test_transient_state_stays_private_on_a_shared_bus() {
    let alice = StateHandler::spawn(
        StateConfig::default(),
        catalog(),
        MemoryDriver::new(),
        Some(BusHandler::default()),
    )
    .unwrap();
    let bob = alice.new_connection();
    let store = handle!("app.session.cart");

    alice
        .deploy_transient::<Counter>(&store, Count { count: 1 })
        .await
        .unwrap();
    let mut observed = alice.observe(&store).await.unwrap();
    let first = tokio::time::timeout(WAIT, observed.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.value(), Some(&json!({"count": 1})));

    bob.deploy_transient::<Counter>(&store, Count { count: 50 })
        .await
        .unwrap();

    // Once the bus is shared, neither transient store is on it.
    let mut seen = Vec::new();
    while let Ok(Some(notification)) =
        tokio::time::timeout(Duration::from_millis(200), observed.next()).await
    {
        let terminal = notification.is_terminal();
        seen.push(notification);
        if terminal {
            break;
        }
    }
    assert!(
        seen.iter().all(|n| n.value() != Some(&json!({"count": 50}))),
        "leaked: {seen:?}"
    );
    assert_eq!(alice.state(&store).await.unwrap(), json!({"count": 1}));
    assert_eq!(bob.state(&store).await.unwrap(), json!({"count": 50}));
}

#[tokio::test]
async fn test_shared_bus_publishes_durable_state_once() {
    let alice = StateHandler::spawn(
        StateConfig::default(),
        catalog(),
        MemoryDriver::new(),
        Some(BusHandler::default()),
    )
    .unwrap();
    let bob = alice.new_connection();
    let store = handle!("app.counter.main");

    alice
        .deploy::<Counter>(&store, Count { count: 0 })
        .await
        .unwrap();
    let mut observed = alice.observe(&store).await.unwrap();
    let first = tokio::time::timeout(WAIT, observed.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.value(), Some(&json!({"count": 0})));

    // A second connection on the same bus must not republish the store.
    bob.connection().await.unwrap();
    alice.dispatch(&store, Action::new("increment")).await.unwrap();

    let second = tokio::time::timeout(WAIT, observed.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.value(), Some(&json!({"count": 1})));
    let quiet = tokio::time::timeout(Duration::from_millis(100), observed.next()).await;
    assert!(quiet.is_err(), "unexpected notification: {quiet:?}");
}

#[tokio::test]
async fn test_panicking_action_settles_the_serialized_queue() {
    let config = StateConfig {
        ordering: DispatchOrdering::Serialized,
        ..StateConfig::default()
    };
    let state = StateHandler::spawn(config, catalog(), MemoryDriver::new(), None).unwrap();
    let store = handle!("a.b.faulty");
    state.deploy::<Faulty>(&store, 0).await.unwrap();

    let exploded = state.dispatch(&store, Action::new("explode"));
    let queued = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        state.dispatch(&store, Action::new("bump")).await
    };
    let both = async { tokio::join!(exploded, queued) };
    let (exploded, queued) = tokio::time::timeout(WAIT, both)
        .await
        .expect("queue stalled after a panicking action");

    assert!(matches!(
        exploded.unwrap_err(),
        StateError::Panicked { ref action, .. } if action == "explode"
    ));
    assert_eq!(queued.unwrap(), json!(1));
    assert_eq!(state.state(&store).await.unwrap(), json!(1));
}

#[tokio::test]
async fn test_interleaved_dispatch_last_write_wins() {
    let state = spawn(&MemoryDriver::new());
    let store = handle!("a.b.journal");
    state.deploy::<Journal>(&store, Vec::new()).await.unwrap();

    let slow = state.dispatch(
        &store,
        Action::with_args("append", vec![json!("slow"), json!(100)]),
    );
    let fast = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        state
            .dispatch(
                &store,
                Action::with_args("append", vec![json!("fast"), json!(0)]),
            )
            .await
    };
    let (slow, fast) = tokio::join!(slow, fast);
    assert_eq!(fast.unwrap(), json!(["fast"]));
    assert_eq!(slow.unwrap(), json!(["slow"]));

    assert_eq!(state.state(&store).await.unwrap(), json!(["slow"]));
}

#[tokio::test]
async fn test_serialized_dispatch_runs_in_order() {
    let config = StateConfig {
        ordering: DispatchOrdering::Serialized,
        ..StateConfig::default()
    };
    let state = StateHandler::spawn(config, catalog(), MemoryDriver::new(), None).unwrap();
    let store = handle!("a.b.journal");
    state.deploy::<Journal>(&store, Vec::new()).await.unwrap();

    let slow = state.dispatch(
        &store,
        Action::with_args("append", vec![json!("slow"), json!(100)]),
    );
    let fast = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        state
            .dispatch(
                &store,
                Action::with_args("append", vec![json!("fast"), json!(0)]),
            )
            .await
    };
    let (slow, fast) = tokio::join!(slow, fast);
    assert_eq!(slow.unwrap(), json!(["slow"]));
    assert_eq!(fast.unwrap(), json!(["slow", "fast"]));
}

#[test]
fn test_typed_manifest_matches_catalog() {
    // The manifest a handler ships is the one the worker checks against.
    assert_eq!(catalog().manifest("counter"), Some(Counter::manifest()));
}
