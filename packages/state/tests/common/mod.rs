#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use statebus_state::{
    Action, Catalog, Effects, HttpRequest, HttpResponse, Manifest, RelayEffect, Result,
    StateError, Store,
};

pub const WAIT: Duration = Duration::from_secs(2);

/// Poll `check` until it holds or `WAIT` elapses.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Count {
    pub count: i64,
}

pub struct Counter;

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
            other => Err(StateError::InvalidArgument(other.to_string())),
        }
    }
}

/// Appends after an optional delay, to expose dispatch ordering.
pub struct Journal;

#[async_trait]
impl Store for Journal {
    type State = Vec<String>;

    fn manifest() -> Manifest {
        Manifest::new("journal").action("append", "(entry: String, delay_ms: u64) -> Vec<String>")
    }

    async fn reduce(
        &self,
        mut state: Vec<String>,
        action: Action,
        _effects: &Effects,
    ) -> Result<Vec<String>> {
        let entry: String = action.arg_as(0)?;
        let delay: u64 = action.arg_as(1)?;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        state.push(entry);
        Ok(state)
    }
}

/// Reads another store through the relay effect.
pub struct Mirror;

#[async_trait]
impl Store for Mirror {
    type State = serde_json::Value;

    fn manifest() -> Manifest {
        Manifest::new("mirror").action("copy", "(handle: String) -> Value")
    }

    async fn reduce(
        &self,
        _state: serde_json::Value,
        action: Action,
        effects: &Effects,
    ) -> Result<serde_json::Value> {
        let handle: String = action.arg_as(0)?;
        effects.call("relay", json!({ "handle": handle })).await
    }
}

/// Stores the body of a GET through the http effect.
pub struct Fetcher;

#[async_trait]
impl Store for Fetcher {
    type State = serde_json::Value;

    fn manifest() -> Manifest {
        Manifest::new("fetcher").action("fetch", "(path: String) -> Value")
    }

    async fn reduce(
        &self,
        _state: serde_json::Value,
        action: Action,
        effects: &Effects,
    ) -> Result<serde_json::Value> {
        let path: String = action.arg_as(0)?;
        let response: HttpResponse = effects.call_as("net", HttpRequest::get(path)).await?;
        if !response.is_success() {
            return Err(StateError::InvalidArgument(format!(
                "fetch failed with status {}",
                response.status
            )));
        }
        Ok(response.body)
    }
}

/// Panics on `explode`, counts on `bump`.
pub struct Faulty;

#[async_trait]
impl Store for Faulty {
    type State = i64;

    fn manifest() -> Manifest {
        Manifest::new("faulty")
            .action("explode", "() -> i64")
            .action("bump", "() -> i64")
    }

    async fn reduce(&self, state: i64, action: Action, _effects: &Effects) -> Result<i64> {
        if action.name == "explode" {
            panic!("exploded at {state}");
        }
        Ok(state + 1)
    }
}

pub fn catalog() -> Catalog {
    Catalog::new()
        .with_store(Counter)
        .with_store(Journal)
        .with_store(Mirror)
        .with_store(Fetcher)
        .with_store(Faulty)
        .with_effect(RelayEffect)
}
