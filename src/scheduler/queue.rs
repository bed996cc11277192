//! Runs [`Operation`]s on a caller-supplied tokio runtime.
//!
//! The queue owns no threads of its own: each added operation becomes a task
//! on the given [`Handle`], which starts it and then waits for it to finish.
//! With a concurrency limit, the task holds a semaphore permit until the
//! operation reports finished, not merely until `start` returns.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use super::Operation;

pub struct OperationQueue {
    handle: Handle,
    limit: Option<Arc<Semaphore>>,
    operations: Mutex<Vec<Arc<dyn Operation>>>,
}

impl OperationQueue {
    /// Creates an unbounded queue that spawns onto `handle`.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            limit: None,
            operations: Mutex::new(Vec::new()),
        }
    }

    /// Creates a queue on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Allows at most `max` operations to be in flight at once. `0` is treated as `1`.
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.limit = Some(Arc::new(Semaphore::new(max.max(1))));
        self
    }

    /// Schedules `operation`. The returned handle completes once it has finished.
    pub fn add<O>(&self, operation: O) -> JoinHandle<()>
    where
        O: Operation + 'static,
    {
        let operation: Arc<dyn Operation> = Arc::new(operation);
        {
            let mut operations = self.operations.lock();
            operations.retain(|op| !op.state().is_finished());
            operations.push(Arc::clone(&operation));
        }

        let limit = self.limit.clone();
        self.handle.spawn(async move {
            let _permit = match limit {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };

            operation.start();
            operation.state().finished().await;
            debug!("operation finished");
        })
    }

    /// Number of added operations that have not finished yet.
    pub fn pending(&self) -> usize {
        self.operations
            .lock()
            .iter()
            .filter(|op| !op.state().is_finished())
            .count()
    }

    /// Cancels every added operation that has not finished.
    pub fn cancel_all(&self) {
        let operations: Vec<_> = self.operations.lock().drain(..).collect();
        for operation in operations {
            if !operation.state().is_finished() {
                operation.cancel();
            }
        }
    }
}
