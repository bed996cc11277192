//! Batch maintenance over the cache store.
//!
//! [`Sweeper::sweep`] evicts expired entries; [`Sweeper::purge_all`] removes
//! everything. Both take a snapshot of the key list first, so entries written
//! by in-flight requests after enumeration are left for the next pass.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{SharedClock, SystemClock};
use crate::logging::Logger;

use super::CacheEntry;
use super::store::SharedStore;

/// Counts from one [`Sweeper::sweep`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Keys enumerated.
    pub scanned: usize,
    /// Expired entries deleted.
    pub removed: usize,
    /// Entries kept because they could not be read or decoded.
    pub unreadable: usize,
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sweep: scanned {}, removed {}, kept {} unreadable",
            self.scanned, self.removed, self.unreadable
        )
    }
}

#[derive(Clone)]
pub struct Sweeper {
    store: SharedStore,
    clock: SharedClock,
    logger: Logger,
}

impl Sweeper {
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

    /// Deletes every entry whose expiry has passed.
    ///
    /// Entries that cannot be read or decoded are retained. Running it twice
    /// with no writes in between leaves the store unchanged the second time.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let Some(keys) = self.keys() else {
            return report;
        };
        let now = self.clock.now();

        for key in keys {
            report.scanned += 1;
            let entry = match self.store.read(&key) {
                Ok(Some(text)) => CacheEntry::decode(&text).ok(),
                // Deleted since enumeration.
                Ok(None) => continue,
                Err(e) => {
                    self.logger.log(|| format!("failed to read cache entry {key}: {e}"));
                    None
                }
            };

            match entry {
                Some(entry) if entry.is_expired(now) => {
                    if self.delete(&key) {
                        report.removed += 1;
                    }
                }
                Some(_) => {}
                None => report.unreadable += 1,
            }
        }

        self.logger.log(|| report.to_string());
        report
    }

    /// Deletes every entry regardless of contents. Returns the number deleted.
    pub fn purge_all(&self) -> usize {
        let Some(keys) = self.keys() else {
            return 0;
        };
        let removed = keys.iter().filter(|key| self.delete(key)).count();
        self.logger.log(|| format!("purge: removed {removed} entries"));
        removed
    }

    /// Runs [`sweep`](Self::sweep) every `period` on `handle` until `cancel` fires.
    ///
    /// The first pass runs immediately.
    pub fn spawn_periodic(
        &self,
        handle: &Handle,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let sweeper = self.clone();
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = sweeper.sweep();
                        tracing::debug!(
                            scanned = report.scanned,
                            removed = report.removed,
                            unreadable = report.unreadable,
                            "periodic cache sweep"
                        );
                    }
                }
            }
        })
    }

    fn keys(&self) -> Option<Vec<String>> {
        match self.store.list_keys() {
            Ok(keys) => Some(keys),
            Err(e) => {
                self.logger.log(|| format!("error while enumerating cache entries: {e}"));
                None
            }
        }
    }

    fn delete(&self, key: &str) -> bool {
        match self.store.delete(key) {
            Ok(()) => true,
            Err(e) => {
                self.logger.log(|| format!("failed to delete cache entry {key}: {e}"));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::cache::{CacheStore, FileStore, MemoryStore};
    use crate::clock::{Clock, ManualClock};

    fn seed(store: &dyn CacheStore, clock: &ManualClock) {
        let now = clock.now();
        for (key, offset) in [
            ("expired/a", -10),
            ("expired/b", 0),
            ("live/a", 1),
            ("live/b", 60),
            ("live/c", 3600),
        ] {
            let entry = CacheEntry::new(key, now + TimeDelta::seconds(offset));
            store.write(key, &entry.encode().unwrap()).unwrap();
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, Sweeper) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        seed(store.as_ref(), &clock);
        let sweeper = Sweeper::with_clock(store.clone(), clock.clone(), Logger::disabled());
        (store, clock, sweeper)
    }

    #[test]
    fn sweep_removes_only_expired() {
        let (store, _clock, sweeper) = setup();
        let report = sweeper.sweep();
        assert_eq!(
            report,
            SweepReport {
                scanned: 5,
                removed: 2,
                unreadable: 0
            }
        );
        assert_eq!(store.list_keys().unwrap(), vec!["live/a", "live/b", "live/c"]);
    }

    #[test]
    fn purge_removes_everything() {
        let (store, _clock, sweeper) = setup();
        store.write("garbage", "not a cache entry").unwrap();
        assert_eq!(sweeper.purge_all(), 6);
        assert!(store.is_empty());
    }

    #[test]
    fn second_sweep_is_a_noop() {
        let (store, _clock, sweeper) = setup();
        sweeper.sweep();
        let before = store.snapshot();
        let report = sweeper.sweep();
        assert_eq!(report.removed, 0);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn unreadable_entries_are_retained() {
        let (store, clock, sweeper) = setup();
        store.write("garbage", "{\"responseString\":1}").unwrap();
        clock.advance(Duration::from_secs(7200));

        let report = sweeper.sweep();
        assert_eq!(report.removed, 5);
        assert_eq!(report.unreadable, 1);
        assert_eq!(store.list_keys().unwrap(), vec!["garbage"]);
    }

    #[test]
    fn sweep_on_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path()));
        let clock = Arc::new(ManualClock::default());
        seed(store.as_ref(), &clock);

        let sweeper = Sweeper::with_clock(store.clone(), clock, Logger::disabled());
        assert_eq!(sweeper.sweep().removed, 2);
        assert_eq!(store.list_keys().unwrap().len(), 3);
        assert_eq!(sweeper.purge_all(), 3);
        assert!(store.list_keys().unwrap().is_empty());
    }

    #[tokio::test]
    async fn periodic_sweep_stops_on_cancel() {
        let (store, _clock, sweeper) = setup();
        let cancel = CancellationToken::new();
        let task = sweeper.spawn_periodic(
            &Handle::current(),
            Duration::from_millis(10),
            cancel.clone(),
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.len() != 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        task.await.unwrap();
    }
}
