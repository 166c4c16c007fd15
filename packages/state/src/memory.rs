//! In-process driver.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::driver::{Driver, DriverError};

/// A [`Driver`] backed by a shared in-memory map.
///
/// Clones share the same map, so a test can keep one clone to inspect what a
/// worker persisted. Keys enumerate in sorted order.
///
/// # Example
///
/// ```rust
/// use statebus_state::{Driver, MemoryDriver};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let driver = MemoryDriver::new();
/// driver.set_item("name", "Alice".to_string()).await.unwrap();
///
/// assert_eq!(driver.get_item("name").await.unwrap().as_deref(), Some("Alice"));
/// assert_eq!(driver.length().await.unwrap(), 1);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryDriver {
    /// Create a new empty driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a driver with initial entries.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    /// Copy of everything currently stored.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn get_item(&self, key: &str) -> Result<Option<String>, DriverError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), DriverError> {
        self.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), DriverError> {
        self.lock().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), DriverError> {
        self.lock().clear();
        Ok(())
    }

    async fn key(&self, index: usize) -> Result<Option<String>, DriverError> {
        Ok(self.lock().keys().nth(index).cloned())
    }

    async fn length(&self) -> Result<usize, DriverError> {
        Ok(self.lock().len())
    }
}
