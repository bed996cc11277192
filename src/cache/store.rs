//! The persistence seam beneath the cache manager and sweeper.

use std::sync::Arc;

use thiserror::Error;

/// Errors reported by a [`CacheStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid cache key {key:?}")]
    InvalidKey { key: String },
}

/// A namespaced key→text store.
///
/// Each operation is atomic for a single key; nothing spans keys. Concurrent
/// writers to the same key race and the last write wins.
pub trait CacheStore: Send + Sync {
    /// Creates the namespace if it does not exist. Idempotent.
    fn ensure_namespace(&self) -> Result<(), StoreError>;

    /// Stores `text` under `key`, replacing any previous value.
    fn write(&self, key: &str, text: &str) -> Result<(), StoreError>;

    /// Returns the text stored under `key`, or `None` if there is none.
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Removes `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Lists every key currently in the namespace.
    fn list_keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Shared, type-erased store handle.
pub type SharedStore = Arc<dyn CacheStore>;
