//! The transport seam: sends a [`TransportRequest`] and reports one result.
//!
//! A [`Transport`] starts the call and returns immediately with a
//! [`CancelHandle`]; the [`Completion`] is invoked later, from whatever thread
//! the transport chooses, at most once. Cancelling the handle stops the call;
//! a cancelled call may complete with [`TransportError::Cancelled`] or not at
//! all.

use tokio_util::sync::CancellationToken;
use thiserror::Error;

use crate::http::{RawResponse, ResponseError, TransportRequest};

pub mod tcp;

pub use tcp::TcpTransport;

/// Errors produced by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed response: {0}")]
    Response(#[from] ResponseError),

    #[error("connection closed before the response was complete")]
    Truncated,

    #[error("unsupported response framing: {0}")]
    Unsupported(&'static str),

    #[error("response exceeds maximum allowed size of {max_bytes} bytes")]
    TooLarge { max_bytes: usize },

    #[error("request timed out")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,
}

/// Callback receiving the outcome of one transport call.
pub type Completion = Box<dyn FnOnce(Result<RawResponse, TransportError>) + Send + 'static>;

/// Cancels one in-flight transport call. Cloning shares the same call.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a token the transport is already watching.
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Asynchronous request sender.
pub trait Transport: Send + Sync {
    /// Starts sending `request` and returns without waiting for the response.
    ///
    /// `completion` is invoked at most once, possibly on another thread.
    fn request(&self, request: TransportRequest, completion: Completion) -> CancelHandle;
}
