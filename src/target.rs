//! Request targets: what to send, and how to cache the answer.

use crate::cache::CachePolicy;
use crate::http::TransportRequest;

/// Descriptor of one logical request.
///
/// The `identifier` names the cache slot the response lives in and must be
/// unique per logical slot (for example `users/42`). It has no default.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ttlcall::{CachePolicy, Target};
/// use ttlcall::http::TransportRequest;
///
/// let target = Target::new("users/42", TransportRequest::get("api.example.com", "/users/42"))
///     .cache_policy(CachePolicy::FirstFromCache(Duration::from_secs(60)));
///
/// assert_eq!(target.identifier(), "users/42");
/// assert!(target.policy().reads_first());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    identifier: String,
    policy: CachePolicy,
    request: TransportRequest,
}

impl Target {
    /// Creates a target with [`CachePolicy::Never`].
    ///
    /// # Panics
    ///
    /// In debug builds, panics if `identifier` is empty.
    pub fn new(identifier: impl Into<String>, request: TransportRequest) -> Self {
        let identifier = identifier.into();
        debug_assert!(
            !identifier.is_empty(),
            "a Target needs a non-empty cache identifier"
        );
        Self {
            identifier,
            policy: CachePolicy::default(),
            request,
        }
    }

    #[must_use]
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn request(&self) -> &TransportRequest {
        &self.request
    }
}
