use crate::{query, Version};
use std::{error, fmt, io};

#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,

    InvalidUrl,
    #[allow(dead_code)]
    Query(query::Error),

    InvalidVersion,
    UnsupportedVersion,

    InvalidHeader,
    TooManyHeaders,
    InvalidContentLength,
    InvalidConnection,

    /// A method that requires a declared body (`POST`/`PUT`) had neither
    /// `Content-Length` nor `Transfer-Encoding: chunked`.
    LengthRequired,
    InvalidTransferEncoding,
    /// A `Transfer-Encoding` token other than `chunked`/`identity`.
    UnsupportedTransferEncoding,
    ChunkedBodyMalformed,
    /// `Strictness::Strict` requires a `Host` header on every request.
    MissingHost,
    /// `Expect: 100-continue` was sent but `DaemonOptions::answer_expect_continue`
    /// is disabled.
    ExpectationFailed,

    BodyTooLarge,
    #[allow(dead_code)]
    BodyMismatch {
        expected: usize,
        available: usize,
    },
    #[allow(dead_code)]
    UnexpectedBody(usize),
    /// `action_parse_post`'s `PostProcessor` construction rejected the
    /// request's `Content-Type` (unsupported or missing `multipart` boundary).
    UnsupportedMediaType,
    /// `action_parse_post` decoded a key or value that was not valid UTF-8.
    InvalidUtf8,

    ServiceUnavailable,
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        pub(crate) const fn as_http(
            &self,
            version: Version,
            json: bool,
        ) -> &'static [u8] {
            match (json, self, version) { $(
                (true, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (true, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
            )* }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "400 Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;

        InvalidUrl: "400 Bad Request", "51"
            => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;
        Query: "400 Bad Request", "55"
            => r#"{"error":"Invalid query string","code":"INVALID_QUERY"}"#;

        InvalidVersion: "400 Bad Request", "57"
            => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        UnsupportedVersion: "505 HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#;

        InvalidHeader: "400 Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        TooManyHeaders: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#;
        InvalidContentLength: "400 Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        InvalidConnection: "400 Bad Request", "65"
            => r#"{"error":"Invalid Connection header","code":"INVALID_CONNECTION"}"#;

        LengthRequired: "411 Length Required", "66"
            => r#"{"error":"A message body length is required","code":"LENGTH_REQUIRED"}"#;
        InvalidTransferEncoding: "400 Bad Request", "63"
            => r#"{"error":"Invalid Transfer-Encoding","code":"INVALID_TRANSFER_ENCODING"}"#;
        UnsupportedTransferEncoding: "501 Not Implemented", "67"
            => r#"{"error":"Unsupported Transfer-Encoding","code":"UNSUPPORTED_TRANSFER_ENCODING"}"#;
        ChunkedBodyMalformed: "400 Bad Request", "58"
            => r#"{"error":"Malformed chunked body","code":"CHUNKED_BODY_MALFORMED"}"#;
        MissingHost: "400 Bad Request", "50"
            => r#"{"error":"Missing Host header","code":"MISSING_HOST"}"#;
        ExpectationFailed: "417 Expectation Failed", "62"
            => r#"{"error":"Unsupported Expect value","code":"EXPECTATION_FAILED"}"#;

        BodyTooLarge: "413 Payload Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        BodyMismatch: "400 Bad Request", "55"
            => r#"{"error":"Body length mismatch","code":"BODY_MISMATCH"}"#;
        UnexpectedBody: "400 Bad Request", "60"
            => r#"{"error":"Unexpected request body","code":"UNEXPECTED_BODY"}"#;
        UnsupportedMediaType: "415 Unsupported Media Type", "79"
            => r#"{"error":"Unsupported Content-Type for upload","code":"UNSUPPORTED_MEDIA_TYPE"}"#;
        InvalidUtf8: "400 Bad Request", "59"
            => r#"{"error":"Field was not valid UTF-8","code":"INVALID_UTF8"}"#;

        ServiceUnavailable: "503 Service Unavailable", "72"
            => r#"{"error":"Service temporarily unavailable","code":"SERVICE_UNAVAILABLE"}"#;
        Io: "503 Service Unavailable", "48"
            => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#;
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<query::Error> for ErrorKind {
    fn from(err: query::Error) -> Self {
        ErrorKind::Query(err)
    }
}
impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

/// Connection-lifecycle failures that cannot be answered with a canned HTTP
/// response and are instead surfaced to whatever drives the daemon (a
/// [`tracing`] subscriber, an external event loop, or a handler's own error
/// path). Per-request parse failures never reach here: they are resolved
/// internally to a canned byte response via [`ErrorKind::as_http`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The peer sent bytes that could not be parsed as HTTP even after the
    /// connection's own recovery attempt (used for diagnostics; the wire
    /// response was already sent by the time this is raised).
    #[error("malformed request: {0}")]
    ClientProtocolError(String),

    /// No bytes arrived (or none were consumed) within the configured
    /// read/write/idle deadline.
    #[error("client timed out during {phase}")]
    ClientTimeout { phase: &'static str },

    /// The peer closed the connection mid-request or mid-response.
    #[error("client disconnected")]
    ClientDisconnect,

    /// A configured limit (connection count, memory pool, queue depth) was
    /// reached and the request could not be admitted.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// TLS termination in front of this connection failed before any HTTP
    /// bytes were exchanged.
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailure(#[source] io::Error),

    /// A [`Handler`](crate::Handler) implementation returned or panicked
    /// with an application-level error.
    #[error("handler error: {0}")]
    ApplicationError(#[source] Box<dyn error::Error + Send + Sync>),

    /// A [`ServerBuilder`](crate::ServerBuilder) was misconfigured (missing
    /// listener/handler, contradictory limits).
    #[error("invalid configuration: {0}")]
    ConfigurationError(&'static str),
}
