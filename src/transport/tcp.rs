//! Plain HTTP/1.1 transport over a Tokio `TcpStream`.
//!
//! One connection per request (`Connection: close`). The response head is
//! parsed with `httparse`; the body is read up to `Content-Length`, or to EOF
//! when no length is given. Chunked bodies and TLS are not supported.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CancelHandle, Completion, Transport, TransportError};
use crate::http::{RawResponse, ResponseError, TransportRequest};

/// Maximum size of a complete response we will buffer before giving up (8 MiB).
const MAX_RESPONSE_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Sends each request on its own task on the given runtime.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use ttlcall::http::TransportRequest;
/// use ttlcall::transport::{TcpTransport, Transport};
///
/// #[tokio::main]
/// async fn main() {
///     let transport = TcpTransport::current().with_timeout(Duration::from_secs(10));
///     let (tx, rx) = tokio::sync::oneshot::channel();
///     let _handle = transport.request(
///         TransportRequest::get("127.0.0.1", "/health").port(8080),
///         Box::new(move |result| { let _ = tx.send(result); }),
///     );
///     println!("{:?}", rx.await);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TcpTransport {
    handle: Handle,
    timeout: Option<Duration>,
}

impl TcpTransport {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            timeout: None,
        }
    }

    /// Creates a transport on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Fails requests that take longer than `timeout` end to end.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Like [`with_timeout`](Self::with_timeout), leaving the transport unbounded for `None`.
    #[must_use]
    pub fn with_optional_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Transport for TcpTransport {
    fn request(&self, request: TransportRequest, completion: Completion) -> CancelHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let timeout = self.timeout;

        self.handle.spawn(async move {
            let result = tokio::select! {
                _ = cancelled.cancelled() => Err(TransportError::Cancelled),
                result = send_with_timeout(request, timeout) => result,
            };
            if let Err(e) = &result {
                warn!(error = %e, "request failed");
            }
            completion(result);
        });

        CancelHandle::from_token(token)
    }
}

async fn send_with_timeout(
    request: TransportRequest,
    timeout: Option<Duration>,
) -> Result<RawResponse, TransportError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, send(request))
            .await
            .map_err(|_| TransportError::Timeout)?,
        None => send(request).await,
    }
}

/// Sends one request and reads one response on a fresh connection.
async fn send(request: TransportRequest) -> Result<RawResponse, TransportError> {
    let addr = request.authority();
    let head_only = request.method().expects_empty_body();

    let mut stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| TransportError::Connect {
            addr: addr.clone(),
            source,
        })?;

    debug!(
        addr = %addr,
        method = %request.method(),
        path = %request.path(),
        "sending request"
    );
    stream.write_all(&request.into_bytes()).await?;
    stream.flush().await?;

    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    let head = loop {
        let (head, body_offset) = read_head(&mut stream, &mut buf).await?;
        let _ = buf.split_to(body_offset);
        // Skip interim 1xx responses; 101 has no final response to wait for.
        if (100..200).contains(&head.status()) && head.status() != 101 {
            continue;
        }
        break head;
    };

    debug!(addr = %addr, status = head.status(), "response head received");

    if head_only || matches!(head.status(), 101 | 204 | 304) {
        return Ok(head);
    }
    if head.headers().is_chunked() {
        return Err(TransportError::Unsupported("chunked transfer encoding"));
    }

    match head.headers().content_length() {
        Some(len) => {
            if len > MAX_RESPONSE_SIZE {
                return Err(TransportError::TooLarge {
                    max_bytes: MAX_RESPONSE_SIZE,
                });
            }
            while buf.len() < len {
                if stream.read_buf(&mut buf).await? == 0 {
                    return Err(TransportError::Truncated);
                }
            }
            buf.truncate(len);
        }
        None => loop {
            if stream.read_buf(&mut buf).await? == 0 {
                break;
            }
            if buf.len() > MAX_RESPONSE_SIZE {
                return Err(TransportError::TooLarge {
                    max_bytes: MAX_RESPONSE_SIZE,
                });
            }
        },
    }

    Ok(head.with_body(buf.freeze()))
}

/// Reads until `buf` holds a complete response head.
async fn read_head(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
) -> Result<(RawResponse, usize), TransportError> {
    loop {
        match RawResponse::parse_head(buf) {
            Ok(pair) => return Ok(pair),
            Err(ResponseError::Incomplete) => {}
            Err(e) => return Err(e.into()),
        }
        if buf.len() > MAX_RESPONSE_SIZE {
            return Err(TransportError::TooLarge {
                max_bytes: MAX_RESPONSE_SIZE,
            });
        }
        if stream.read_buf(buf).await? == 0 {
            return Err(TransportError::Truncated);
        }
    }
}
