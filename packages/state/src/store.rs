//! Stores: action-driven state machines and the messages that drive them.
//!
//! Behavior never crosses the boundary between a handler and its worker.
//! What crosses is data: a [`Manifest`] describing a store kind, and
//! [`Action`] messages naming one of its actions. The behavior itself is
//! the worker's own [`Store`] implementation, looked up by kind in its
//! [`Catalog`](crate::Catalog).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use statebus_core::Value;

use crate::effect::Effects;
use crate::error::{Result, StateError};

/// Version of the messages exchanged with a state worker.
pub const SCHEMA_VERSION: u32 = 1;

fn schema_version() -> u32 {
    SCHEMA_VERSION
}

/// A request to run one named action with arguments.
///
/// Serialized as `{"schema": 1, "name": "increment", "args": []}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default = "schema_version")]
    pub schema: u32,
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Action {
    /// An action with no arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// An action with the given arguments.
    pub fn with_args(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            args,
            ..Self::new(name)
        }
    }

    /// Append a serializable argument.
    pub fn arg(mut self, arg: impl Serialize) -> Result<Self> {
        self.args.push(serde_json::to_value(arg)?);
        Ok(self)
    }

    /// Deserialize the argument at `index`.
    pub fn arg_as<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.args.get(index).ok_or_else(|| {
            StateError::InvalidArgument(format!(
                "action '{}' expects an argument at position {index}",
                self.name
            ))
        })?;
        Ok(serde_json::from_value(value.clone())?)
    }

    pub(crate) fn check_schema(&self) -> Result<()> {
        if self.schema == SCHEMA_VERSION {
            Ok(())
        } else {
            Err(StateError::Schema {
                expected: SCHEMA_VERSION,
                found: self.schema,
            })
        }
    }
}

/// Description of a store kind: its name and the signature of every action.
///
/// Two manifests describe the same behavior when they share a kind and
/// every shared action has the same signature string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub kind: String,
    pub actions: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            actions: BTreeMap::new(),
        }
    }

    /// Add an action and its signature.
    pub fn action(mut self, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.actions.insert(name.into(), signature.into());
        self
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Names of the actions both manifests declare with different signatures.
    pub fn conflicts(&self, other: &Manifest) -> Vec<String> {
        self.actions
            .iter()
            .filter(|(name, signature)| {
                other
                    .actions
                    .get(*name)
                    .is_some_and(|theirs| theirs != *signature)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Names of the actions `other` declares that this manifest lacks.
    pub fn missing(&self, other: &Manifest) -> Vec<String> {
        other
            .actions
            .keys()
            .filter(|name| !self.actions.contains_key(*name))
            .cloned()
            .collect()
    }
}

/// An action-driven state machine.
///
/// Implementations live on the worker side and are registered in a
/// [`Catalog`](crate::Catalog). `reduce` receives the current state and
/// returns the next one; the state is replaced wholesale.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde::{Deserialize, Serialize};
/// use statebus_state::{Action, Effects, Manifest, Result, StateError, Store};
///
/// #[derive(Serialize, Deserialize)]
/// struct Count {
///     count: i64,
/// }
///
/// struct Counter;
///
/// #[async_trait]
/// impl Store for Counter {
///     type State = Count;
///
///     fn manifest() -> Manifest {
///         Manifest::new("counter").action("increment", "() -> Count")
///     }
///
///     async fn reduce(&self, state: Count, action: Action, _effects: &Effects) -> Result<Count> {
///         match action.name.as_str() {
///             "increment" => Ok(Count { count: state.count + 1 }),
///             other => Err(StateError::InvalidArgument(other.to_string())),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type State: Serialize + DeserializeOwned + Send + 'static;

    fn manifest() -> Manifest
    where
        Self: Sized;

    async fn reduce(&self, state: Self::State, action: Action, effects: &Effects)
        -> Result<Self::State>;
}

/// Type-erased store operating on JSON states.
#[async_trait]
pub trait ErasedStore: Send + Sync {
    fn manifest(&self) -> Manifest;

    async fn reduce(&self, state: Value, action: Action, effects: &Effects) -> Result<Value>;
}

#[async_trait]
impl<T: Store> ErasedStore for T {
    fn manifest(&self) -> Manifest {
        <T as Store>::manifest()
    }

    async fn reduce(&self, state: Value, action: Action, effects: &Effects) -> Result<Value> {
        let state: T::State = serde_json::from_value(state)?;
        let next = Store::reduce(self, state, action, effects).await?;
        Ok(serde_json::to_value(next)?)
    }
}

/// A shared type-erased store.
pub type SharedStore = Arc<dyn ErasedStore>;
