//! Namespaced, self-describing records on top of a [`Driver`].
//!
//! Every durable store is saved as one JSON record under
//! `<namespace>.v<version>/<handle>`. The record embeds the manifest it was
//! written with, so a record left behind by a different store kind, or by
//! actions whose signatures have since changed, is recognized as stale and
//! discarded instead of being fed to the wrong behavior.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use statebus_core::{Handle, Value};
use tracing::{debug, warn};

use crate::driver::Driver;
use crate::error::Result;
use crate::store::Manifest;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    #[serde(flatten)]
    manifest: Manifest,
    state: Value,
}

/// Persistence layer shared by a state worker and its persisters.
#[derive(Clone)]
pub struct Persistence {
    driver: Arc<dyn Driver>,
    prefix: String,
}

impl fmt::Debug for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistence")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl Persistence {
    pub fn new(driver: Arc<dyn Driver>, namespace: &str, version: u32) -> Self {
        Self {
            driver,
            prefix: format!("{namespace}.v{version}/"),
        }
    }

    /// The driver key for `handle`.
    pub fn key(&self, handle: &Handle) -> String {
        format!("{}{handle}", self.prefix)
    }

    /// Load the persisted state for `handle`, if a record written by the
    /// same behavior exists. Stale records are removed.
    pub async fn load(&self, handle: &Handle, manifest: &Manifest) -> Result<Option<Value>> {
        let key = self.key(handle);
        let Some(raw) = self.driver.get_item(&key).await? else {
            return Ok(None);
        };

        let record: Record = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(%handle, error = %e, "discarding unreadable persisted record");
                self.driver.remove_item(&key).await?;
                return Ok(None);
            }
        };

        if record.manifest.kind != manifest.kind
            || !record.manifest.conflicts(manifest).is_empty()
        {
            warn!(
                %handle,
                persisted = %record.manifest.kind,
                deployed = %manifest.kind,
                "discarding stale persisted record"
            );
            self.driver.remove_item(&key).await?;
            return Ok(None);
        }

        debug!(%handle, "loaded persisted state");
        Ok(Some(record.state))
    }

    /// Write `state` for `handle`.
    pub async fn save(&self, handle: &Handle, manifest: &Manifest, state: &Value) -> Result<()> {
        let record = Record {
            manifest: manifest.clone(),
            state: state.clone(),
        };
        let raw = serde_json::to_string(&record)?;
        self.driver.set_item(&self.key(handle), raw).await?;
        Ok(())
    }

    /// Remove the record for `handle`.
    pub async fn remove(&self, handle: &Handle) -> Result<()> {
        self.driver.remove_item(&self.key(handle)).await?;
        Ok(())
    }

    /// Remove every record of the current namespace version, leaving other
    /// keys alone. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize> {
        let keys = self.keys().await?;
        for key in &keys {
            self.driver.remove_item(key).await?;
        }
        debug!(prefix = %self.prefix, removed = keys.len(), "cleared persisted records");
        Ok(keys.len())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let length = self.driver.length().await?;
        let mut keys = Vec::new();
        for index in 0..length {
            if let Some(key) = self.driver.key(index).await? {
                if key.starts_with(&self.prefix) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}
