//! HTTP/1.1 response parsing using the [`httparse`] crate.

use bytes::Bytes;
use thiserror::Error;

use super::Headers;

/// Errors that can occur while parsing an HTTP/1.1 response head.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A response as delivered by the transport: status, headers and the raw body.
///
/// The body is exposed both as bytes ([`bytes`](Self::bytes)) and as a UTF-8
/// view ([`text`](Self::text)).
///
/// # Examples
///
/// ```
/// use ttlcall::http::RawResponse;
///
/// let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n";
/// let (head, offset) = RawResponse::parse_head(raw).unwrap();
/// assert_eq!(head.status(), 200);
/// assert_eq!(offset, raw.len());
///
/// let response = head.with_body("{}");
/// assert_eq!(response.text().unwrap(), "{}");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    status: u16,
    reason: String,
    headers: Headers,
    body: Bytes,
}

impl RawResponse {
    /// Maximum number of headers we accept per response.
    const MAX_HEADERS: usize = 64;

    /// Creates a response directly, without going through the wire parser.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            reason: String::new(),
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// Parses a response status line and headers from `buf`.
    ///
    /// Returns the response (with an empty body) and the byte offset at which
    /// the body begins in `buf`.
    ///
    /// # Errors
    ///
    /// - [`ResponseError::Incomplete`] — more data is needed to complete the head.
    /// - [`ResponseError::Parse`] — the data is malformed.
    /// - [`ResponseError::MissingField`] — the status code is absent.
    pub fn parse_head(buf: &[u8]) -> Result<(Self, usize), ResponseError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Response::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ResponseError::Incomplete),
        };

        let status = raw
            .code
            .ok_or(ResponseError::MissingField { field: "status" })?;
        let reason = raw.reason.unwrap_or_default().to_owned();

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        Ok((
            Self {
                status,
                reason,
                headers: header_map,
                body: Bytes::new(),
            },
            body_offset,
        ))
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns the numeric status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns the reason phrase from the status line (empty if none was sent).
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Raw body bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// UTF-8 view of the body.
    ///
    /// # Errors
    ///
    /// Returns [`std::str::Utf8Error`] if the body is not valid UTF-8.
    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }
}
