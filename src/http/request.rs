//! Outgoing HTTP/1.1 request description and serialization.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use super::{Headers, Method};

/// Default port for plain HTTP.
const DEFAULT_PORT: u16 = 80;

/// Describes one request for the transport to send.
///
/// Built with a fluent API and serialized to wire format by
/// [`into_bytes`](Self::into_bytes).
///
/// # Examples
///
/// ```
/// use ttlcall::http::{Method, TransportRequest};
///
/// let request = TransportRequest::new(Method::Get, "api.example.com", "/users/42")
///     .header("Accept", "application/json");
///
/// let bytes = request.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("GET /users/42 HTTP/1.1\r\n"));
/// assert!(text.contains("Host: api.example.com\r\n"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    method: Method,
    host: String,
    port: u16,
    path: String,
    headers: Headers,
    body: Bytes,
}

impl TransportRequest {
    /// Creates a request for `path` on `host`, port 80, with no headers and an empty body.
    ///
    /// A path without a leading `/` is prefixed with one.
    pub fn new(method: Method, host: impl Into<String>, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self {
            method,
            host: host.into(),
            port: DEFAULT_PORT,
            path,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(Method::Get, host, path)
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Appends a request header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body from raw bytes.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes `value` as the JSON request body and sets `Content-Type`.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] if `value` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.body = Bytes::from(serde_json::to_vec(value)?);
        self.headers.set("Content-Type", "application/json");
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port_number(&self) -> u16 {
        self.port
    }

    /// Returns the request target (path plus query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Returns `host:port`, suitable for [`tokio::net::TcpStream::connect`].
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Serializes the request into HTTP/1.1 wire format.
    ///
    /// Automatically adds, unless already set:
    /// - `Host` (with the port when it is not 80).
    /// - `Connection: close`, since the transport reads one response per connection.
    ///
    /// `Content-Length` is always written when the body is non-empty or the
    /// method conventionally carries one.
    pub fn into_bytes(mut self) -> BytesMut {
        if !self.headers.contains("host") {
            let host = if self.port == DEFAULT_PORT {
                self.host.clone()
            } else {
                self.authority()
            };
            self.headers.insert("Host", host);
        }
        if !self.headers.contains("connection") {
            self.headers.insert("Connection", "close");
        }
        self.headers.remove("content-length");

        let estimated_size = 64 + self.path.len() + self.headers.len() * 64 + self.body.len();
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(format!("{} {} HTTP/1.1\r\n", self.method, self.path).as_bytes());
        buf.put(self.headers.to_string().as_bytes());
        if !self.body.is_empty() || self.method.permits_body() {
            buf.put(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        buf.put(&b"\r\n"[..]);
        buf.put(self.body);

        buf
    }
}
