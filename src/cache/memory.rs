//! In-process [`CacheStore`] backed by a locked `BTreeMap`.
//!
//! Useful for tests and for short-lived processes that want TTL semantics
//! without touching disk.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::store::{CacheStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copy of the current contents, in key order.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.read().clone()
    }
}

impl CacheStore for MemoryStore {
    fn ensure_namespace(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn write(&self, key: &str, text: &str) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey { key: String::new() });
        }
        self.entries.write().insert(key.to_owned(), text.to_owned());
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}
