//! Worker-side registry of store and effect behavior, keyed by kind.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use statebus_core::Handle;

use crate::effect::{Effect, EffectSpec, SharedEffect};
use crate::error::{Result, StateError};
use crate::store::{ErasedStore, Manifest, SharedStore, Store};

/// The behavior a state worker can run.
///
/// Deploying a manifest or implanting an effect spec only names a kind; the
/// worker resolves that kind here and checks that the caller's description
/// agrees with the registered one.
#[derive(Clone, Default)]
pub struct Catalog {
    stores: BTreeMap<String, SharedStore>,
    effects: BTreeMap<String, SharedEffect>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .field("effects", &self.effects.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under its manifest's kind, replacing any previous
    /// registration of that kind.
    pub fn register<S: Store>(&mut self, store: S) -> &mut Self {
        let shared: SharedStore = Arc::new(store);
        self.stores.insert(<S as Store>::manifest().kind, shared);
        self
    }

    /// Builder form of [`Catalog::register`].
    pub fn with_store<S: Store>(mut self, store: S) -> Self {
        self.register(store);
        self
    }

    /// Register an effect under its spec's kind.
    pub fn register_effect<E: Effect>(&mut self, effect: E) -> &mut Self {
        let kind = effect.spec().kind;
        self.effects.insert(kind, Arc::new(effect));
        self
    }

    /// Builder form of [`Catalog::register_effect`].
    pub fn with_effect<E: Effect>(mut self, effect: E) -> Self {
        self.register_effect(effect);
        self
    }

    /// Resolve the store for `manifest`, checking the manifest agrees with
    /// the registered one.
    pub(crate) fn resolve_store(
        &self,
        handle: &Handle,
        manifest: &Manifest,
    ) -> Result<SharedStore> {
        let store = self
            .stores
            .get(&manifest.kind)
            .ok_or_else(|| StateError::UnknownKind(manifest.kind.clone()))?;

        let registered = store.manifest();
        let mut actions = registered.conflicts(manifest);
        actions.extend(registered.missing(manifest));
        if !actions.is_empty() {
            return Err(StateError::Conflict {
                handle: handle.clone(),
                actions,
            });
        }
        Ok(Arc::clone(store))
    }

    /// Resolve the effect for `spec`, checking its signature.
    pub(crate) fn resolve_effect(&self, locate: &str, spec: &EffectSpec) -> Result<SharedEffect> {
        let effect = self
            .effects
            .get(&spec.kind)
            .ok_or_else(|| StateError::UnknownEffect(spec.kind.clone()))?;
        if effect.spec().signature != spec.signature {
            return Err(StateError::EffectConflict {
                locate: locate.to_string(),
            });
        }
        Ok(Arc::clone(effect))
    }

    /// Manifests of every registered store kind.
    pub fn manifests(&self) -> impl Iterator<Item = Manifest> + '_ {
        self.stores.values().map(|store| store.manifest())
    }

    pub fn manifest(&self, kind: &str) -> Option<Manifest> {
        self.stores.get(kind).map(|store| store.manifest())
    }

    pub fn effect_spec(&self, kind: &str) -> Option<EffectSpec> {
        self.effects.get(kind).map(|effect| effect.spec())
    }
}
