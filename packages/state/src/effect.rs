//! Effects: named capabilities actions can call.
//!
//! An action never reaches the worker directly. It receives an [`Effects`]
//! value, and every privileged operation goes through an implanted
//! [`Effect`] that is resolved by its locate name at call time and invoked
//! with an [`EffectScope`] bound to the calling connection.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use statebus_core::{Handle, Value};

use crate::error::{Result, StateError};
use crate::store::{Action, SCHEMA_VERSION};
use crate::worker::{ConnectionId, StateLink};

fn schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Description of an effect kind, implanted under a locate name.
///
/// A locate name always resolves to one behavior: implanting a spec whose
/// kind or signature differs from what is already implanted fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectSpec {
    #[serde(default = "schema_version")]
    pub schema: u32,
    pub kind: String,
    pub signature: String,
}

impl EffectSpec {
    pub fn new(kind: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            kind: kind.into(),
            signature: signature.into(),
        }
    }
}

/// A side-effecting capability.
#[async_trait]
pub trait Effect: Send + Sync + 'static {
    /// The kind and signature this effect implements.
    fn spec(&self) -> EffectSpec;

    /// Run the effect with JSON arguments.
    async fn invoke(&self, scope: &EffectScope, args: Value) -> Result<Value>;
}

/// A shared effect.
pub type SharedEffect = Arc<dyn Effect>;

/// The privileged operations available to an effect, bound to the
/// connection whose dispatch is running.
#[derive(Clone)]
pub struct EffectScope {
    connection: ConnectionId,
    link: StateLink,
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("connection", &self.connection)
            .finish()
    }
}

impl EffectScope {
    pub(crate) fn new(connection: ConnectionId, link: StateLink) -> Self {
        Self { connection, link }
    }

    /// The connection this scope acts for.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Dispatch against another handle as the calling connection.
    pub async fn dispatch(&self, handle: &Handle, action: Action) -> Result<Value> {
        self.link.dispatch(self.connection, handle, action).await
    }

    /// Read another handle's state as the calling connection.
    pub async fn state(&self, handle: &Handle) -> Result<Value> {
        self.link.state(self.connection, handle).await
    }
}

/// The effects capability handed to every action.
#[derive(Clone, Debug)]
pub struct Effects {
    scope: EffectScope,
}

impl Effects {
    pub(crate) fn new(scope: EffectScope) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &EffectScope {
        &self.scope
    }

    /// Invoke the effect implanted under `locate`.
    pub async fn call(&self, locate: &str, args: Value) -> Result<Value> {
        let effect = self.scope.link.effect(locate).await?;
        effect.invoke(&self.scope, args).await
    }

    /// Typed variant of [`Effects::call`].
    pub async fn call_as<A, T>(&self, locate: &str, args: A) -> Result<T>
    where
        A: Serialize,
        T: DeserializeOwned,
    {
        let args = serde_json::to_value(args)?;
        let value = self.call(locate, args).await?;
        serde_json::from_value(value).map_err(StateError::from)
    }
}

/// Effect that reads or dispatches against other handles on behalf of the
/// calling connection.
///
/// Arguments: `{"handle": "a.b.store"}` reads a state,
/// `{"handle": "a.b.store", "action": {...}}` dispatches.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayEffect;

#[derive(Deserialize)]
struct RelayArgs {
    handle: Handle,
    #[serde(default)]
    action: Option<Action>,
}

#[async_trait]
impl Effect for RelayEffect {
    fn spec(&self) -> EffectSpec {
        EffectSpec::new("relay", "({handle, action?}) -> State")
    }

    async fn invoke(&self, scope: &EffectScope, args: Value) -> Result<Value> {
        let args: RelayArgs = serde_json::from_value(args)?;
        match args.action {
            Some(action) => scope.dispatch(&args.handle, action).await,
            None => scope.state(&args.handle).await,
        }
    }
}
