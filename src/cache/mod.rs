//! Response caching — policies, persisted entries, and the stores behind them.
//!
//! ## Core types
//!
//! - [`CachePolicy`] — per-target choice of whether and how to cache.
//! - [`CacheEntry`] — the persisted `{payload, expiry}` record.
//! - [`CacheManager`] — policy evaluation, expiry checks, entry reads/writes.
//! - [`CacheStore`] — namespaced key→text persistence ([`FileStore`], [`MemoryStore`]).
//! - [`Sweeper`] — batch eviction of expired entries, or of everything.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod file;
pub mod manager;
pub mod memory;
pub mod store;
pub mod sweeper;

pub use file::FileStore;
pub use manager::CacheManager;
pub use memory::MemoryStore;
pub use store::{CacheStore, SharedStore, StoreError};
pub use sweeper::{SweepReport, Sweeper};

/// How a target's responses interact with the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Always go to the transport; never read or write the cache.
    #[default]
    Never,
    /// Always go to the transport, then cache the result for `ttl`.
    RefreshCache(Duration),
    /// Serve from the cache while fresh; otherwise go to the transport and cache for `ttl`.
    FirstFromCache(Duration),
}

impl CachePolicy {
    /// The time-to-live for written entries, or `None` for [`CachePolicy::Never`].
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::RefreshCache(ttl) | Self::FirstFromCache(ttl) => Some(*ttl),
        }
    }

    /// Returns `true` if lookups consult the cache before the transport.
    pub fn reads_first(&self) -> bool {
        matches!(self, Self::FirstFromCache(_))
    }
}

/// A persisted cache record.
///
/// Serialized as a flat JSON object: `{"payload": "...", "expiry": "<RFC 3339>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub payload: String,
    pub expiry: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(payload: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        Self {
            payload: payload.into(),
            expiry,
        }
    }

    /// An entry is stale once `expiry <= now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    /// Decodes a record as written by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] if `text` is not a cache record.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// # Errors
    ///
    /// Serialization of this struct does not fail in practice; the error is
    /// propagated rather than unwrapped.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Errors on the cache read path. Callers treat every variant as a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store error: {0}")]
    Store(#[from] StoreError),

    #[error("unreadable cache entry: {0}")]
    Decode(#[from] serde_json::Error),
}
