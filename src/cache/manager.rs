//! Cache policy evaluation and entry expiry.

use std::sync::Arc;

use crate::clock::{self, SharedClock, SystemClock};
use crate::logging::Logger;
use crate::target::Target;

use super::store::SharedStore;
use super::{CacheEntry, CacheError, CachePolicy};

/// Reads, writes and expires cache entries according to each target's policy.
///
/// Persistence is delegated to the [`CacheStore`](super::CacheStore); this
/// type owns only the policy decisions, the expiry comparison and the entry
/// format. Cheap to clone.
#[derive(Clone)]
pub struct CacheManager {
    store: SharedStore,
    clock: SharedClock,
    logger: Logger,
}

impl CacheManager {
    /// Creates a manager on the system clock.
    pub fn new(store: SharedStore, logger: Logger) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), logger)
    }

    pub fn with_clock(store: SharedStore, clock: SharedClock, logger: Logger) -> Self {
        Self {
            store,
            clock,
            logger,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Looks up a fresh cached payload for `target`.
    ///
    /// Only [`CachePolicy::FirstFromCache`] reads; other policies always miss.
    /// An expired entry is deleted and reported as a miss.
    ///
    /// # Errors
    ///
    /// [`CacheError::Store`] if the store read fails, [`CacheError::Decode`]
    /// if the stored record is unreadable. Callers treat both as a miss.
    pub fn get_cached_object(&self, target: &Target) -> Result<Option<String>, CacheError> {
        if !target.policy().reads_first() {
            return Ok(None);
        }

        let identifier = target.identifier();
        let Some(text) = self.store.read(identifier)? else {
            return Ok(None);
        };

        let entry = CacheEntry::decode(&text).inspect_err(|e| {
            self.logger
                .log(|| format!("JSON decoding error for cache entry {identifier}: {e}"));
        })?;

        if entry.is_expired(self.clock.now()) {
            self.logger
                .log(|| format!("cache entry {identifier} expired at {}", entry.expiry));
            self.delete(identifier);
            return Ok(None);
        }

        Ok(Some(entry.payload))
    }

    /// Persists `payload` for `target` with `expiry = now + ttl`.
    ///
    /// A no-op under [`CachePolicy::Never`]. Overwrites any existing entry.
    /// Failures are logged and swallowed.
    pub fn cache_response(&self, target: &Target, payload: &str) {
        let ttl = match target.policy() {
            CachePolicy::Never => return,
            CachePolicy::RefreshCache(ttl) | CachePolicy::FirstFromCache(ttl) => ttl,
        };

        let identifier = target.identifier();
        let entry = CacheEntry::new(payload, clock::add_saturating(self.clock.now(), ttl));
        let text = match entry.encode() {
            Ok(text) => text,
            Err(e) => {
                self.logger
                    .log(|| format!("failed to encode cache entry {identifier}: {e}"));
                return;
            }
        };

        match self.store.write(identifier, &text) {
            Ok(()) => self.logger.log(|| format!("cached {identifier} until {}", entry.expiry)),
            Err(e) => self
                .logger
                .log(|| format!("failed to write cache entry {identifier}: {e}")),
        }
    }

    fn delete(&self, identifier: &str) {
        self.logger.log(|| format!("deleting cache entry {identifier}"));
        if let Err(e) = self.store.delete(identifier) {
            self.logger
                .log(|| format!("failed to delete cache entry {identifier}: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;
    use crate::cache::{CacheStore, MemoryStore};
    use crate::clock::{Clock, ManualClock};
    use crate::http::TransportRequest;

    const TTL: Duration = Duration::from_secs(60);

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        manager: CacheManager,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let manager =
            CacheManager::with_clock(store.clone(), clock.clone(), Logger::disabled());
        Fixture {
            store,
            clock,
            manager,
        }
    }

    fn target(policy: CachePolicy) -> Target {
        Target::new("users/42", TransportRequest::get("localhost", "/users/42"))
            .cache_policy(policy)
    }

    #[test]
    fn never_policy_does_not_write() {
        let f = fixture();
        f.store.write("users/42", "untouched").unwrap();
        f.manager.cache_response(&target(CachePolicy::Never), "new");
        assert_eq!(f.store.read("users/42").unwrap().as_deref(), Some("untouched"));

        f.store.delete("users/42").unwrap();
        f.manager.cache_response(&target(CachePolicy::Never), "new");
        assert!(f.store.is_empty());
    }

    #[test]
    fn write_sets_expiry_from_ttl() {
        for policy in [CachePolicy::RefreshCache(TTL), CachePolicy::FirstFromCache(TTL)] {
            let f = fixture();
            let written_at = f.clock.now();
            f.manager.cache_response(&target(policy), "{\"id\":42}");

            assert_eq!(f.store.len(), 1);
            let raw = f.store.read("users/42").unwrap().unwrap();
            let entry = CacheEntry::decode(&raw).unwrap();
            assert_eq!(entry.payload, "{\"id\":42}");
            assert_eq!(entry.expiry, written_at + TimeDelta::seconds(60));
        }
    }

    #[test]
    fn write_overwrites_previous_entry() {
        let f = fixture();
        let t = target(CachePolicy::RefreshCache(TTL));
        f.manager.cache_response(&t, "old");
        f.clock.advance(Duration::from_secs(5));
        f.manager.cache_response(&t, "new");

        let entry = CacheEntry::decode(&f.store.read("users/42").unwrap().unwrap()).unwrap();
        assert_eq!(entry.payload, "new");
        assert_eq!(entry.expiry, f.clock.now() + TimeDelta::seconds(60));
        assert_eq!(f.store.len(), 1);
    }

    #[test]
    fn non_reading_policies_always_miss() {
        let f = fixture();
        let fresh = CacheEntry::new("cached", f.clock.now() + TimeDelta::hours(1));
        f.store.write("users/42", &fresh.encode().unwrap()).unwrap();

        for policy in [CachePolicy::Never, CachePolicy::RefreshCache(TTL)] {
            assert_eq!(f.manager.get_cached_object(&target(policy)).unwrap(), None);
        }
        assert_eq!(f.store.len(), 1);
    }

    #[test]
    fn fresh_entry_is_returned() {
        let f = fixture();
        let t = target(CachePolicy::FirstFromCache(TTL));
        f.manager.cache_response(&t, "payload");
        f.clock.advance(Duration::from_secs(59));
        assert_eq!(
            f.manager.get_cached_object(&t).unwrap().as_deref(),
            Some("payload")
        );
    }

    #[test]
    fn expired_entry_is_deleted() {
        let f = fixture();
        let t = target(CachePolicy::FirstFromCache(TTL));
        f.manager.cache_response(&t, "payload");
        f.clock.advance(TTL);

        assert_eq!(f.manager.get_cached_object(&t).unwrap(), None);
        assert_eq!(f.store.read("users/42").unwrap(), None);
    }

    #[test]
    fn absent_entry_misses() {
        let f = fixture();
        let t = target(CachePolicy::FirstFromCache(TTL));
        assert_eq!(f.manager.get_cached_object(&t).unwrap(), None);
    }

    #[test]
    fn unreadable_entry_is_a_decode_error() {
        let f = fixture();
        f.store.write("users/42", "not json").unwrap();
        let t = target(CachePolicy::FirstFromCache(TTL));
        assert!(matches!(
            f.manager.get_cached_object(&t),
            Err(CacheError::Decode(_))
        ));
        // Left in place; only the sweeper or a later write replaces it.
        assert_eq!(f.store.len(), 1);
    }

    #[test]
    fn zero_ttl_is_immediately_stale() {
        let f = fixture();
        let t = target(CachePolicy::FirstFromCache(Duration::ZERO));
        f.manager.cache_response(&t, "payload");
        assert_eq!(f.manager.get_cached_object(&t).unwrap(), None);
        assert!(f.store.is_empty());
    }
}
