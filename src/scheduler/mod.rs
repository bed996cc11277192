//! Cancellable async operations and the queue that runs them.
//!
//! ## Core types
//!
//! - [`OperationState`] — the `executing`/`finished`/`cancelled` flags of one
//!   operation, guarded by a single mutex so no observer ever sees a torn pair.
//! - [`Operation`] — trait for work with an asynchronous completion: `start`
//!   runs the body, and the body (or a cancellation) later calls
//!   [`OperationState::finish`].
//! - [`OperationQueue`] — runs operations on a caller-supplied tokio runtime.
//!
//! ## Lifecycle
//!
//! ```text
//! idle ──start──▶ executing ──finish──▶ finished
//!   │                 │
//!   └──cancel──┐      └──cancel──▶ (body settles) ──finish──▶ finished
//!              ▼
//!        start ──▶ finished   (body never runs)
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

pub mod queue;

pub use queue::OperationQueue;

/// Snapshot of an operation's flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub executing: bool,
    pub finished: bool,
    pub cancelled: bool,
}

/// Which flag a [`FlagChange`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKey {
    Executing,
    Finished,
    Cancelled,
}

/// A notification flanking one flag mutation.
///
/// Every mutation emits `WillChange` (with the flags before) and then
/// `DidChange` (with the flags after), both while the flags lock is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagChange {
    WillChange { key: FlagKey, flags: Flags },
    DidChange { key: FlagKey, flags: Flags },
}

/// Callback receiving [`FlagChange`] notifications.
///
/// Runs with the flags lock held: it must not call back into the
/// [`OperationState`] it observes.
pub type FlagObserver = Arc<dyn Fn(FlagChange) + Send + Sync>;

struct Inner {
    flags: Flags,
    observers: Vec<FlagObserver>,
}

impl Inner {
    fn set(&mut self, key: FlagKey, value: bool) {
        let slot = match key {
            FlagKey::Executing => self.flags.executing,
            FlagKey::Finished => self.flags.finished,
            FlagKey::Cancelled => self.flags.cancelled,
        };
        if slot == value {
            return;
        }

        self.notify(FlagChange::WillChange {
            key,
            flags: self.flags,
        });
        match key {
            FlagKey::Executing => self.flags.executing = value,
            FlagKey::Finished => self.flags.finished = value,
            FlagKey::Cancelled => self.flags.cancelled = value,
        }
        self.notify(FlagChange::DidChange {
            key,
            flags: self.flags,
        });
    }

    fn notify(&self, change: FlagChange) {
        for observer in &self.observers {
            observer(change);
        }
    }
}

/// Thread-safe flags for one operation.
///
/// All reads and writes go through one lock; compound transitions
/// ([`begin`](Self::begin), [`finish`](Self::finish)) update both flags in a
/// single critical section, so readers never see a half-applied transition.
pub struct OperationState {
    inner: Mutex<Inner>,
    changes: watch::Sender<Flags>,
}

impl OperationState {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(Flags::default());
        Self {
            inner: Mutex::new(Inner {
                flags: Flags::default(),
                observers: Vec::new(),
            }),
            changes,
        }
    }

    pub fn flags(&self) -> Flags {
        self.inner.lock().flags
    }

    pub fn is_executing(&self) -> bool {
        self.flags().executing
    }

    pub fn is_finished(&self) -> bool {
        self.flags().finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags().cancelled
    }

    /// Registers `observer` for every subsequent flag change.
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(FlagChange) + Send + Sync + 'static,
    {
        self.inner.lock().observers.push(Arc::new(observer));
    }

    /// Returns a receiver that sees each completed transition's flags.
    pub fn subscribe(&self) -> watch::Receiver<Flags> {
        self.changes.subscribe()
    }

    /// Resolves once `finished` is set.
    pub async fn finished(&self) {
        let mut rx = self.changes.subscribe();
        // The sender lives as long as `self`, so this only returns on a match.
        let _ = rx.wait_for(|flags| flags.finished).await;
    }

    /// Enters the executing state, unless already cancelled.
    ///
    /// Returns `true` if the caller should run the operation body. A cancelled
    /// operation goes straight to finished and `false` is returned. An
    /// operation that already started is left untouched.
    pub fn begin(&self) -> bool {
        self.transition(|inner| {
            if inner.flags.executing || inner.flags.finished {
                false
            } else if inner.flags.cancelled {
                inner.set(FlagKey::Finished, true);
                false
            } else {
                inner.set(FlagKey::Finished, false);
                inner.set(FlagKey::Executing, true);
                true
            }
        })
    }

    /// Leaves the executing state and marks the operation finished.
    ///
    /// Idempotent. Returns `true` only for the call that set `finished`.
    pub fn finish(&self) -> bool {
        self.transition(|inner| {
            let first = !inner.flags.finished;
            inner.set(FlagKey::Executing, false);
            inner.set(FlagKey::Finished, true);
            first
        })
    }

    /// Marks the operation cancelled. Safe from any thread, at any time.
    ///
    /// Returns `true` only for the call that set `cancelled`.
    pub fn cancel(&self) -> bool {
        self.transition(|inner| {
            let first = !inner.flags.cancelled;
            inner.set(FlagKey::Cancelled, true);
            first
        })
    }

    fn transition<R>(&self, apply: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.inner.lock();
        let result = apply(&mut inner);
        self.changes.send_replace(inner.flags);
        result
    }
}

impl Default for OperationState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationState")
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

/// A unit of work whose completion may arrive after `start` returns.
///
/// Implementors provide [`state`](Self::state) and [`execute`](Self::execute);
/// the body must eventually call `self.state().finish()`. The default
/// [`start`](Self::start) runs the body on the caller's context, exactly once,
/// unless the operation was cancelled first.
pub trait Operation: Send + Sync {
    fn state(&self) -> &OperationState;

    /// The operation body. Called at most once, by [`start`](Self::start).
    fn execute(&self);

    fn start(&self) {
        if self.state().begin() {
            self.execute();
        }
    }

    fn cancel(&self) {
        self.state().cancel();
    }
}
