//! The key/value storage contract used for persistence.
//!
//! A `Driver` is the only thing the state engine knows about storage. It is
//! shaped like a browser `Storage`: string keys, string values, enumerable by
//! index.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The backend failed the operation.
    #[error("backend failure: {0}")]
    Backend(String),

    /// The backend can no longer be reached.
    #[error("storage unavailable")]
    Unavailable,
}

/// Async key/value storage.
///
/// # Object Safety
///
/// This trait is object-safe: the worker holds an `Arc<dyn Driver>`.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Read the value stored under `key`.
    async fn get_item(&self, key: &str) -> Result<Option<String>, DriverError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set_item(&self, key: &str, value: String) -> Result<(), DriverError>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove_item(&self, key: &str) -> Result<(), DriverError>;

    /// Remove every key.
    async fn clear(&self) -> Result<(), DriverError>;

    /// The key at `index` in the driver's enumeration order.
    async fn key(&self, index: usize) -> Result<Option<String>, DriverError>;

    /// Number of stored keys.
    async fn length(&self) -> Result<usize, DriverError>;
}

// Blanket implementations for shared and boxed drivers

#[async_trait]
impl<T: Driver + ?Sized> Driver for Arc<T> {
    async fn get_item(&self, key: &str) -> Result<Option<String>, DriverError> {
        (**self).get_item(key).await
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), DriverError> {
        (**self).set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), DriverError> {
        (**self).remove_item(key).await
    }

    async fn clear(&self) -> Result<(), DriverError> {
        (**self).clear().await
    }

    async fn key(&self, index: usize) -> Result<Option<String>, DriverError> {
        (**self).key(index).await
    }

    async fn length(&self) -> Result<usize, DriverError> {
        (**self).length().await
    }
}

#[async_trait]
impl<T: Driver + ?Sized> Driver for Box<T> {
    async fn get_item(&self, key: &str) -> Result<Option<String>, DriverError> {
        self.as_ref().get_item(key).await
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), DriverError> {
        self.as_ref().set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), DriverError> {
        self.as_ref().remove_item(key).await
    }

    async fn clear(&self) -> Result<(), DriverError> {
        self.as_ref().clear().await
    }

    async fn key(&self, index: usize) -> Result<Option<String>, DriverError> {
        self.as_ref().key(index).await
    }

    async fn length(&self) -> Result<usize, DriverError> {
        self.as_ref().length().await
    }
}
