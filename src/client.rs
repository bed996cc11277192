//! Entry point: shared collaborators plus executor construction.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;

use crate::cache::{CacheManager, CacheStore, FileStore, StoreError, Sweeper};
use crate::config::Config;
use crate::executor::RequestExecutor;
use crate::logging::Logger;
use crate::target::Target;
use crate::transport::{TcpTransport, Transport};

/// Creates [`RequestExecutor`]s that share one transport and one cache.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use serde::{Deserialize, Serialize};
/// use ttlcall::{CachePolicy, Client, Target};
/// use ttlcall::config::Config;
/// use ttlcall::http::TransportRequest;
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct User { id: u32, name: String }
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::from_config(&Config::default(), tokio::runtime::Handle::current())?;
///     let target = Target::new("users/42", TransportRequest::get("127.0.0.1", "/users/42").port(8080))
///         .cache_policy(CachePolicy::FirstFromCache(Duration::from_secs(60)));
///
///     let (request, cached) = client.initialize::<User>(target);
///     if let Some(user) = cached {
///         println!("cached: {user:?}");
///     } else {
///         request.run();
///         println!("fetched: {:?}", request.wait().await);
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    cache: CacheManager,
    logger: Logger,
}

impl Client {
    /// The client's logger is the cache manager's.
    pub fn new(transport: Arc<dyn Transport>, cache: CacheManager) -> Self {
        let logger = cache.logger().clone();
        Self {
            transport,
            cache,
            logger,
        }
    }

    /// Builds a client with a [`TcpTransport`] on `handle` and a [`FileStore`]
    /// under [`Config::namespace_dir`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the cache namespace cannot be created.
    pub fn from_config(config: &Config, handle: Handle) -> Result<Self, StoreError> {
        let transport =
            TcpTransport::new(handle).with_optional_timeout(config.request_timeout());
        Self::with_transport(config, Arc::new(transport))
    }

    /// Like [`from_config`](Self::from_config), with a caller-supplied transport.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the cache namespace cannot be created.
    pub fn with_transport(
        config: &Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, StoreError> {
        let store = FileStore::new(config.namespace_dir());
        store.ensure_namespace()?;
        let cache = CacheManager::new(Arc::new(store), config.logger());
        Ok(Self::new(transport, cache))
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// A sweeper over the same store, clock and logger.
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::with_clock(
            Arc::clone(self.cache.store()),
            Arc::clone(self.cache.clock()),
            self.logger.clone(),
        )
    }

    /// Creates an executor that decodes the JSON body into `T`, and returns
    /// the cached value if the target's policy allows a fresh one.
    ///
    /// Only reads the cache; nothing is sent until the executor runs.
    pub fn initialize<T>(&self, target: Target) -> (RequestExecutor<T>, Option<T>)
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let cached = self.cached(&target);
        let executor =
            RequestExecutor::structured(target, Arc::clone(&self.transport), self.cache.clone());
        (executor, cached)
    }

    /// Creates an executor whose value is the raw response text.
    pub fn initialize_text(&self, target: Target) -> (RequestExecutor<String>, Option<String>) {
        let cached = self.cached(&target);
        let executor =
            RequestExecutor::raw_text(target, Arc::clone(&self.transport), self.cache.clone());
        (executor, cached)
    }

    /// Cache lookup where every failure is a miss.
    fn cached<T: DeserializeOwned>(&self, target: &Target) -> Option<T> {
        let identifier = target.identifier();
        let text = match self.cache.get_cached_object(target) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                self.logger
                    .log(|| format!("cache lookup for {identifier} failed: {e}"));
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(value) => {
                self.logger.log(|| format!("{identifier} served from cache"));
                Some(value)
            }
            Err(e) => {
                self.logger
                    .log(|| format!("cached payload for {identifier} does not decode: {e}"));
                None
            }
        }
    }
}
