//! One request's lifecycle: dispatch, decode, cache write, and exactly one result.
//!
//! A [`RequestExecutor`] is created by [`Client::initialize`](crate::Client::initialize)
//! (or [`initialize_text`](crate::Client::initialize_text)) and run either
//! directly with [`run`](RequestExecutor::run) or through an
//! [`OperationQueue`](crate::scheduler::OperationQueue).
//!
//! ## Settlement
//!
//! The outcome slot is written once. Whichever arrives first among the
//! transport completion and [`cancel`](RequestExecutor::cancel) settles it and
//! performs the side effects in order: the cache write (successes only, unless
//! the policy is [`CachePolicy::Never`]), the result callbacks, and the
//! scheduler's finish transition. Every later attempt is a no-op. A panicking
//! callback skips the callbacks after it but not the finish transition.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::cache::{CacheManager, CachePolicy};
use crate::http::RawResponse;
use crate::logging::Logger;
use crate::scheduler::{Operation, OperationState};
use crate::target::Target;
use crate::transport::{CancelHandle, Transport, TransportError};

/// Failure to turn a response body into the requested type.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("response body is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("failed to decode response body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a request did not produce a value.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("request cancelled")]
    Cancelled,
}

/// The terminal result of one executor.
pub type Outcome<T> = Result<T, RequestError>;

/// How a successful response body becomes the executor's value. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultMode {
    /// The body's UTF-8 text is the value, without structured decoding.
    RawText,
    /// The body is decoded as JSON into the value type.
    StructuredDecode,
}

type Decoder<T> = fn(&RawResponse) -> Result<T, DecodeError>;
type ResultCallback<T> = Box<dyn FnOnce(Arc<Outcome<T>>) + Send + 'static>;
type ResponseObserver = Arc<dyn Fn(&Result<RawResponse, TransportError>) + Send + Sync + 'static>;

fn decode_text(response: &RawResponse) -> Result<String, DecodeError> {
    Ok(response.text()?.to_owned())
}

fn decode_json<T: DeserializeOwned>(response: &RawResponse) -> Result<T, DecodeError> {
    Ok(serde_json::from_slice(response.bytes())?)
}

struct Slot<T> {
    outcome: Option<Arc<Outcome<T>>>,
    callbacks: Vec<ResultCallback<T>>,
}

struct Shared<T> {
    target: Target,
    mode: ResultMode,
    decode: Decoder<T>,
    transport: Arc<dyn Transport>,
    cache: CacheManager,
    logger: Logger,
    state: OperationState,
    slot: Mutex<Slot<T>>,
    in_flight: Mutex<Option<CancelHandle>>,
    response_observer: Mutex<Option<ResponseObserver>>,
}

/// Executes one [`Target`] and delivers its [`Outcome`] exactly once.
///
/// Cheap to clone; clones share the same request.
pub struct RequestExecutor<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for RequestExecutor<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl RequestExecutor<String> {
    /// An executor whose value is the response body text.
    pub(crate) fn raw_text(
        target: Target,
        transport: Arc<dyn Transport>,
        cache: CacheManager,
    ) -> Self {
        Self::with_decoder(target, ResultMode::RawText, decode_text, transport, cache)
    }
}

impl<T> RequestExecutor<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// An executor whose value is decoded from the JSON response body.
    pub(crate) fn structured(
        target: Target,
        transport: Arc<dyn Transport>,
        cache: CacheManager,
    ) -> Self {
        Self::with_decoder(
            target,
            ResultMode::StructuredDecode,
            decode_json::<T>,
            transport,
            cache,
        )
    }
}

impl<T> RequestExecutor<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn with_decoder(
        target: Target,
        mode: ResultMode,
        decode: Decoder<T>,
        transport: Arc<dyn Transport>,
        cache: CacheManager,
    ) -> Self {
        let logger = cache.logger().clone();
        Self {
            shared: Arc::new(Shared {
                target,
                mode,
                decode,
                transport,
                cache,
                logger,
                state: OperationState::new(),
                slot: Mutex::new(Slot {
                    outcome: None,
                    callbacks: Vec::new(),
                }),
                in_flight: Mutex::new(None),
                response_observer: Mutex::new(None),
            }),
        }
    }

    pub fn target(&self) -> &Target {
        &self.shared.target
    }

    pub fn mode(&self) -> ResultMode {
        self.shared.mode
    }

    /// Starts the request on the calling context. Equivalent to [`Operation::start`].
    pub fn run(&self) {
        Operation::start(self);
    }

    /// Cancels the request.
    ///
    /// If no outcome has been settled yet, settles [`RequestError::Cancelled`].
    /// The in-flight transport call, if any, is cancelled either way.
    pub fn cancel(&self) {
        let shared = &self.shared;
        // Flag first: a concurrent `start` must not begin once settlement finishes us.
        shared.state.cancel();
        if self.settle(Err(RequestError::Cancelled)) {
            shared
                .logger
                .log(|| format!("request {} cancelled", shared.target.identifier()));
        }
        if let Some(handle) = shared.in_flight.lock().as_ref() {
            handle.cancel();
        }
    }

    /// Registers a callback for the outcome.
    ///
    /// Runs exactly once: at settlement, or immediately if already settled.
    pub fn on_result<F>(&self, callback: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.register(Box::new(move |outcome: Arc<Outcome<T>>| callback(&outcome)));
    }

    /// Observes the raw transport result before it is decoded.
    ///
    /// Replaces any previously registered observer.
    pub fn on_response<F>(&self, observer: F)
    where
        F: Fn(&Result<RawResponse, TransportError>) + Send + Sync + 'static,
    {
        *self.shared.response_observer.lock() = Some(Arc::new(observer));
    }

    /// The settled outcome, if any.
    pub fn outcome(&self) -> Option<Arc<Outcome<T>>> {
        self.shared.slot.lock().outcome.clone()
    }

    /// Waits for the outcome and the finish transition.
    ///
    /// On return the cache write, if any, has happened and
    /// [`is_finished`](Self::is_finished) is `true`.
    pub async fn wait(&self) -> Arc<Outcome<T>> {
        let (tx, rx) = oneshot::channel();
        self.register(Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));
        let outcome = match rx.await {
            Ok(outcome) => Some(outcome),
            // An earlier callback panicked and ours was dropped; the slot is filled.
            Err(_) => self.outcome(),
        };
        self.shared.state.finished().await;
        outcome.unwrap_or_else(|| Arc::new(Err(RequestError::Cancelled)))
    }

    pub fn is_settled(&self) -> bool {
        self.shared.slot.lock().outcome.is_some()
    }

    pub fn is_executing(&self) -> bool {
        self.shared.state.is_executing()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.state.is_finished()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.state.is_cancelled()
    }

    fn register(&self, callback: ResultCallback<T>) {
        let settled = {
            let mut slot = self.shared.slot.lock();
            match &slot.outcome {
                Some(outcome) => Arc::clone(outcome),
                None => {
                    slot.callbacks.push(callback);
                    return;
                }
            }
        };
        callback(settled);
    }

    /// Writes the outcome if the slot is empty and runs the side effects:
    /// cache write, result callbacks, then finish.
    ///
    /// Returns `false` if another path already settled.
    fn settle(&self, outcome: Outcome<T>) -> bool {
        let shared = &self.shared;
        let (outcome, callbacks) = {
            let mut slot = shared.slot.lock();
            if slot.outcome.is_some() {
                return false;
            }
            let outcome = Arc::new(outcome);
            slot.outcome = Some(Arc::clone(&outcome));
            (outcome, std::mem::take(&mut slot.callbacks))
        };
        // Finishes even if a callback panics.
        let _finish = FinishOnDrop(&shared.state);

        if let Ok(value) = outcome.as_ref() {
            self.write_cache(value);
        }

        for callback in callbacks {
            callback(Arc::clone(&outcome));
        }
        true
    }

    fn write_cache(&self, value: &T) {
        let shared = &self.shared;
        if shared.target.policy() == CachePolicy::Never {
            return;
        }
        match serde_json::to_string(value) {
            Ok(text) => shared.cache.cache_response(&shared.target, &text),
            Err(e) => shared.logger.log(|| {
                format!(
                    "failed to encode response for {}: {e}",
                    shared.target.identifier()
                )
            }),
        }
    }

    fn complete(&self, result: Result<RawResponse, TransportError>) {
        let shared = &self.shared;
        let observer = shared.response_observer.lock().clone();
        if let Some(observer) = observer {
            observer(&result);
        }

        if self.is_settled() {
            shared.logger.log(|| {
                format!(
                    "ignoring late response for settled request {}",
                    shared.target.identifier()
                )
            });
            return;
        }

        let outcome = match result {
            Ok(response) => {
                shared.logger.log(|| {
                    format!(
                        "response for {}: {} {}",
                        shared.target.identifier(),
                        response.status(),
                        String::from_utf8_lossy(response.bytes())
                    )
                });
                (shared.decode)(&response).map_err(|e| {
                    shared.logger.log(|| format!("{e}"));
                    RequestError::from(e)
                })
            }
            Err(e) => Err(RequestError::from(e)),
        };
        self.settle(outcome);
    }
}

struct FinishOnDrop<'a>(&'a OperationState);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

impl<T> Operation for RequestExecutor<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn state(&self) -> &OperationState {
        &self.shared.state
    }

    fn execute(&self) {
        let shared = &self.shared;
        if shared.state.is_cancelled() {
            return;
        }

        shared
            .logger
            .log(|| format!("requesting {}", shared.target.identifier()));
        let this = self.clone();
        let handle = shared.transport.request(
            shared.target.request().clone(),
            Box::new(move |result| this.complete(result)),
        );
        *shared.in_flight.lock() = Some(handle.clone());

        // A cancel that raced the dispatch found no handle to cancel.
        if shared.state.is_cancelled() {
            handle.cancel();
        }
    }

    fn cancel(&self) {
        RequestExecutor::cancel(self);
    }
}

impl<T> fmt::Debug for RequestExecutor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("identifier", &self.shared.target.identifier())
            .field("mode", &self.shared.mode)
            .field("state", &self.shared.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    use serde::Deserialize;

    use super::*;
    use crate::cache::{CacheEntry, CacheStore, MemoryStore, StoreError};
    use crate::http::TransportRequest;
    use crate::scheduler::{FlagChange, FlagKey, OperationQueue};
    use crate::transport::testing::{Reply, StubTransport};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u32,
        name: String,
    }

    const USER_JSON: &str = r#"{"id":42,"name":"ada"}"#;

    fn target(policy: CachePolicy) -> Target {
        Target::new("users/42", TransportRequest::get("localhost", "/users/42"))
            .cache_policy(policy)
    }

    fn parts(reply: Reply) -> (Arc<StubTransport>, Arc<MemoryStore>, CacheManager) {
        let transport = StubTransport::new(reply);
        let store = Arc::new(MemoryStore::new());
        let cache = CacheManager::new(store.clone(), Logger::disabled());
        (transport, store, cache)
    }

    fn count_finishes(executor: &impl Operation) -> Arc<AtomicUsize> {
        let finishes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finishes);
        executor.state().observe(move |change| {
            if let FlagChange::DidChange {
                key: FlagKey::Finished,
                flags,
            } = change
            {
                if flags.finished {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        finishes
    }

    #[tokio::test]
    async fn raw_text_skips_decoding() {
        let (transport, store, cache) = parts(Reply::Respond(200, "not json at all"));
        let executor = RequestExecutor::raw_text(target(CachePolicy::Never), transport, cache);
        assert_eq!(executor.mode(), ResultMode::RawText);

        executor.run();
        let outcome = executor.wait().await;
        assert_eq!(outcome.as_ref().as_ref().unwrap(), "not json at all");
        assert!(executor.is_finished());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn structured_success_is_cached() {
        let ttl = Duration::from_secs(60);
        let (transport, store, cache) = parts(Reply::Respond(200, USER_JSON));
        let executor =
            RequestExecutor::<User>::structured(target(CachePolicy::RefreshCache(ttl)), transport, cache);

        executor.run();
        let outcome = executor.wait().await;
        let user = outcome.as_ref().as_ref().unwrap();
        assert_eq!(user.id, 42);

        let entry = CacheEntry::decode(&store.read("users/42").unwrap().unwrap()).unwrap();
        let cached: User = serde_json::from_str(&entry.payload).unwrap();
        assert_eq!(&cached, user);
    }

    #[tokio::test]
    async fn decode_failure_is_not_cached() {
        let (transport, store, cache) = parts(Reply::Respond(200, "<html>"));
        let executor = RequestExecutor::<User>::structured(
            target(CachePolicy::RefreshCache(Duration::from_secs(60))),
            transport,
            cache,
        );
        executor.run();
        let outcome = executor.wait().await;
        assert!(matches!(
            outcome.as_ref(),
            Err(RequestError::Decode(DecodeError::Json(_)))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_surfaced() {
        let (transport, store, cache) = parts(Reply::Fail);
        let executor = RequestExecutor::raw_text(
            target(CachePolicy::FirstFromCache(Duration::from_secs(60))),
            transport,
            cache,
        );
        executor.run();
        let outcome = executor.wait().await;
        assert!(matches!(outcome.as_ref(), Err(RequestError::Transport(_))));
        assert!(store.is_empty());
        assert!(executor.is_finished());
    }

    #[tokio::test]
    async fn cancel_before_run_never_dispatches() {
        let (transport, _store, cache) = parts(Reply::Respond(200, "ok"));
        let executor =
            RequestExecutor::raw_text(target(CachePolicy::Never), transport.clone(), cache);
        let finishes = count_finishes(&executor);

        executor.cancel();
        executor.run();

        assert_eq!(transport.calls(), 0);
        assert!(matches!(
            executor.outcome().unwrap().as_ref(),
            Err(RequestError::Cancelled)
        ));
        assert!(executor.is_finished() && executor.is_cancelled() && !executor.is_executing());
        assert_eq!(finishes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_in_flight_ignores_late_response() {
        let (transport, store, cache) = parts(Reply::Hold);
        let executor = RequestExecutor::raw_text(
            target(CachePolicy::RefreshCache(Duration::from_secs(60))),
            transport.clone(),
            cache,
        );
        let results = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&results);
        executor.on_result(move |outcome| {
            assert!(matches!(outcome, Err(RequestError::Cancelled)));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        executor.run();
        assert!(executor.is_executing());
        executor.cancel();

        let handles = transport.complete_held("late");
        assert!(handles.iter().all(CancelHandle::is_cancelled));
        assert_eq!(results.load(Ordering::SeqCst), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn callback_after_settlement_runs_immediately() {
        let (transport, _store, cache) = parts(Reply::Hold);
        let executor = RequestExecutor::raw_text(target(CachePolicy::Never), transport.clone(), cache);
        executor.run();
        transport.complete_held("done");

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        executor.on_result(move |outcome| {
            *sink.lock() = outcome.as_ref().ok().cloned();
        });
        assert_eq!(seen.lock().as_deref(), Some("done"));
    }

    #[test]
    fn response_observer_sees_raw_result() {
        let (transport, _store, cache) = parts(Reply::Hold);
        let executor =
            RequestExecutor::<User>::structured(target(CachePolicy::Never), transport.clone(), cache);
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&statuses);
        executor.on_response(move |result| {
            sink.lock().push(result.as_ref().map(RawResponse::status).ok());
        });

        executor.run();
        transport.complete_held(USER_JSON);
        assert_eq!(statuses.lock().as_slice(), [Some(200)]);
    }

    #[test]
    fn cancel_races_success_settle_once() {
        for _ in 0..1000 {
            let (transport, _store, cache) = parts(Reply::Hold);
            let executor = RequestExecutor::raw_text(
                target(CachePolicy::RefreshCache(Duration::from_secs(60))),
                transport.clone(),
                cache,
            );
            let results = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&results);
            executor.on_result(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            let finishes = count_finishes(&executor);
            executor.run();

            let barrier = Arc::new(Barrier::new(2));
            let completer = {
                let barrier = Arc::clone(&barrier);
                let transport = Arc::clone(&transport);
                std::thread::spawn(move || {
                    barrier.wait();
                    transport.complete_held("ok");
                })
            };
            let canceller = {
                let barrier = Arc::clone(&barrier);
                let executor = executor.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    executor.cancel();
                })
            };
            completer.join().unwrap();
            canceller.join().unwrap();

            assert_eq!(results.load(Ordering::SeqCst), 1);
            assert_eq!(finishes.load(Ordering::SeqCst), 1);
            assert!(executor.is_settled());
            assert!(executor.is_finished());
        }
    }

    #[tokio::test]
    async fn runs_through_queue() {
        let (transport, _store, cache) = parts(Reply::Respond(200, USER_JSON));
        let queue = OperationQueue::current().with_max_concurrent(4);
        let executors: Vec<_> = (0..8)
            .map(|_| {
                RequestExecutor::<User>::structured(
                    target(CachePolicy::Never),
                    transport.clone(),
                    cache.clone(),
                )
            })
            .collect();

        let handles: Vec<_> = executors.iter().cloned().map(|e| queue.add(e)).collect();
        for handle in handles {
            handle.await.unwrap();
        }
        for executor in &executors {
            assert_eq!(executor.outcome().unwrap().as_ref().as_ref().unwrap().id, 42);
        }
        assert_eq!(transport.calls(), 8);
    }

    /// A store whose writes take a while, to widen the settle window.
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
    }

    impl CacheStore for SlowStore {
        fn ensure_namespace(&self) -> Result<(), StoreError> {
            self.inner.ensure_namespace()
        }

        fn write(&self, key: &str, text: &str) -> Result<(), StoreError> {
            std::thread::sleep(self.delay);
            self.inner.write(key, text)
        }

        fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.read(key)
        }

        fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key)
        }

        fn list_keys(&self) -> Result<Vec<String>, StoreError> {
            self.inner.list_keys()
        }
    }

    #[tokio::test]
    async fn wait_returns_after_cache_write_and_finish() {
        let transport = StubTransport::new(Reply::Respond(200, "slow"));
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(50),
        });
        let cache = CacheManager::new(store.clone(), Logger::disabled());
        let executor = RequestExecutor::raw_text(
            target(CachePolicy::RefreshCache(Duration::from_secs(60))),
            transport,
            cache,
        );

        executor.run();
        let outcome = executor.wait().await;
        assert_eq!(outcome.as_ref().as_ref().unwrap(), "slow");
        assert!(executor.is_finished());
        assert!(!executor.is_executing());
        assert!(store.read("users/42").unwrap().is_some());
    }

    #[test]
    fn result_callbacks_see_the_cache_entry() {
        let (transport, store, cache) = parts(Reply::Hold);
        let executor = RequestExecutor::raw_text(
            target(CachePolicy::RefreshCache(Duration::from_secs(60))),
            transport.clone(),
            cache,
        );
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let reader = Arc::clone(&store);
        executor.on_result(move |_| {
            *sink.lock() = Some(reader.read("users/42").unwrap().is_some());
        });

        executor.run();
        transport.complete_held("body");
        assert_eq!(*seen.lock(), Some(true));
    }

    #[tokio::test]
    async fn panicking_callback_still_finishes() {
        let (transport, store, cache) = parts(Reply::Hold);
        let executor = RequestExecutor::raw_text(
            target(CachePolicy::RefreshCache(Duration::from_secs(60))),
            transport.clone(),
            cache,
        );
        executor.on_result(|_| panic!("callback failure"));
        let waiter = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.wait().await })
        };
        // Let the waiter register behind the panicking callback.
        tokio::task::yield_now().await;

        executor.run();
        let completed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            transport.complete_held("ok");
        }));
        assert!(completed.is_err());

        assert!(executor.is_finished());
        assert!(!executor.is_executing());
        assert!(store.read("users/42").unwrap().is_some());
        let outcome = waiter.await.unwrap();
        assert_eq!(outcome.as_ref().as_ref().unwrap(), "ok");
    }
}
