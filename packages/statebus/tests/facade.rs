use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;

use statebus::state::Result;
use statebus::{
    handle, Action, BusHandler, Catalog, Effects, Manifest, MemoryDriver, Signal, StateConfig,
    StateHandler, Store, Value,
};

struct Toggle;

#[async_trait]
impl Store for Toggle {
    type State = bool;

    fn manifest() -> Manifest {
        Manifest::new("toggle").action("flip", "() -> bool")
    }

    async fn reduce(&self, state: bool, _action: Action, _effects: &Effects) -> Result<bool> {
        Ok(!state)
    }
}

#[tokio::test]
async fn test_state_is_observable_through_the_facade() {
    let bus = BusHandler::default();
    let state = StateHandler::spawn(
        StateConfig::default(),
        Catalog::new().with_store(Toggle),
        MemoryDriver::new(),
        Some(bus.clone()),
    )
    .unwrap();

    let lamp = handle!("home.lamp.desk");
    state.deploy::<Toggle>(&lamp, false).await.unwrap();
    let mut home = bus.observe(&handle!("home")).await.unwrap();

    assert_eq!(
        state.dispatch(&lamp, Action::new("flip")).await.unwrap(),
        json!(true)
    );

    let mut seen: Vec<Value> = Vec::new();
    while seen.last() != Some(&json!(true)) {
        let notification = home.next().await.unwrap();
        assert_eq!(notification.handle, lamp);
        if let Signal::Next { value } = notification.signal {
            seen.push(value);
        }
    }
    assert!(seen.iter().all(|v| v.is_boolean()));
}
