//! # ttlcall
//!
//! Cancellable asynchronous requests with per-request TTL response caching.
//!
//! Each request is described by a [`Target`]: what to send, which cache slot
//! (`identifier`) its response lives in, and a [`CachePolicy`]. A [`Client`]
//! turns a target into a [`RequestExecutor`], consulting the cache first when
//! the policy allows; the executor sends the request, decodes the response,
//! writes the cache, and delivers exactly one outcome, even when cancellation
//! races the response.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use ttlcall::{CachePolicy, Client, Target};
//! use ttlcall::config::Config;
//! use ttlcall::http::TransportRequest;
//! use ttlcall::scheduler::OperationQueue;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_json_str(r#"{ "debug": true }"#)?;
//!     let client = Client::from_config(&config, tokio::runtime::Handle::current())?;
//!
//!     let target = Target::new("status", TransportRequest::get("127.0.0.1", "/status").port(8080))
//!         .cache_policy(CachePolicy::RefreshCache(Duration::from_secs(30)));
//!     let (request, _cached) = client.initialize_text(target);
//!
//!     let queue = OperationQueue::current().with_max_concurrent(8);
//!     queue.add(request.clone());
//!     println!("{:?}", request.wait().await);
//!
//!     client.sweeper().sweep();
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod executor;
pub mod http;
pub mod logging;
pub mod scheduler;
pub mod target;
pub mod transport;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheEntry, CacheManager, CachePolicy, Sweeper};
pub use client::Client;
pub use executor::{DecodeError, Outcome, RequestError, RequestExecutor, ResultMode};
pub use target::Target;
pub use transport::{CancelHandle, Transport, TransportError};
