//! Web server configuration limits and timeouts
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Memory overflows
//! - Slowloris attacks
//! - Header flooding
//!
//! # Memory Consumption
//!
//! Each active connection consumes memory according to:
//!
//! `Total` = [`Request Buffer`](crate::limits::ReqLimits#memory-allocation-strategy) +
//!           [`Response Buffer`](crate::limits::RespLimits#buffer-management) +
//!           `Runtime Overhead`
//!
//! See each component's documentation for details and configuration options.
//!
//! # Examples
//!
//! ```no_run
//! # embercore::impt_default_handler!{MyHandler}
//! use embercore::{Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use tokio::net::TcpListener;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(MyHandler)
//!         .server_limits(ServerLimits {
//!             max_connections: 5000, // Higher concurrency
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             max_requests_per_connection: 10_000,
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 18,      // More headers for complex APIs
//!             body_size: 16 * 1024,  // 16KB for larger payloads
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use std::time::Duration;

/// Controls server-level concurrency, queueing, and performance behavior.
///
/// Configures how the server handles connection admission, worker pools,
/// and overload protection with tunable parameters for different workloads.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  || TCP_STREAM
///                                  \/
/// [--------------]   Yes   /----------------\   No   [-------------]
/// [ Add to queue ] <====== | Queue if full? | =====> [ Sending 503 ]
/// [--------------]         \----------------/        [-------------]
///        ||
///        \==================\\          //====================\
///                            V          V                    ||
/// [---------]   Yes   /--------------------------\   No   [------]
/// [ Handler ] <====== | Is there a free handler? | =====> [ Wait ]
/// [---------]         \--------------------------/        [------]
/// ```
///
/// The queue acts as a buffer between connection acceptance and processing.
/// Workers continuously poll the queue using the configured `wait_strategy`.
/// This is the admission path used by [`WorkMode::WorkerThreads`](crate::WorkMode::WorkerThreads).
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum number of concurrent active connections being processed (default: `100`).
    ///
    /// When the server starts in [`WorkMode::WorkerThreads`](crate::WorkMode::WorkerThreads),
    /// exactly `max_connections` worker tasks are created and used. In
    /// [`WorkMode::ThreadPerConnection`](crate::WorkMode::ThreadPerConnection) this instead
    /// bounds the number of simultaneously live per-connection tasks; further accepts are queued.
    pub max_connections: usize,

    /// Maximum number of TCP connections waiting in the admission queue (default: `250`).
    ///
    /// All accepted connections first go into this queue. Worker processes select
    /// connections from here. If the queue becomes full, new connections receive immediate
    /// HTTP `503` responses.
    ///
    /// For more information, see [Connection management](#connection-management).
    pub max_pending_connections: usize,

    /// Maximum number of connections tracked per remote IP address (default: `64`).
    ///
    /// Additional connections from the same address are refused at accept time, before
    /// a [`Connection`](crate::server::connection::HttpConnection) is constructed, mirroring
    /// the accept-policy callback of the daemon's external interface.
    pub max_connections_per_ip: usize,

    /// Strategy for worker task waiting behavior (default: `Sleep(50μs)`)
    ///
    /// Controls how worker tasks wait when connection buffers are empty
    /// (the size is set by field `max_pending_connections`). Affects latency,
    /// CPU usage, and throughput characteristics.
    pub wait_strategy: WaitStrategy,

    /// Dedicated handlers for queue overflow responses (default: `1`).
    ///
    /// When the connection queue becomes full, these handlers immediately send
    /// responses with the [503](crate::StatusCode::ServiceUnavailable) code. Using
    /// multiple handlers prevents bottlenecks in scenarios with a large volume of
    /// rejected requests. Set to 0 to silently close the connection (not recommended
    /// for production HTTP servers).
    pub count_503_handlers: usize,

    /// Format for error responses (default: `true`)
    ///
    /// # Examples
    /// If `true`, then on error the server will return:
    /// ```text
    /// HTTP/1.1 400 Bad Request\r
    /// connection: close\r
    /// content-length: 55\r
    /// content-type: application/json\r
    /// \r
    /// {"error":"Invalid HTTP method","code":"INVALID_METHOD"}
    /// ```
    /// If `false`, then on error the server will return:
    /// ```text
    /// HTTP/1.1 400 Bad Request\r
    /// connection: close\r
    /// content-length: 0\r
    /// \r
    /// ```
    pub json_errors: bool,

    /// Suppress the automatic `Date` response header (default: `false`).
    ///
    /// Intended for clockless or deterministic-output test environments; see
    /// `daemon_set_options`'s `suppress-date` option.
    pub suppress_date: bool,

    /// Suppress the automatic `Server` response header (default: `false`).
    pub suppress_server_header: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            max_connections_per_ip: 64,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            count_503_handlers: 1,
            json_errors: true,
            suppress_date: false,
            suppress_server_header: false,

            _priv: (),
        }
    }
}

/// Strategy for worker task waiting when no connections are available
///
/// Different strategies optimize for different workload patterns.
/// Choose based on your latency requirements and resource constraints.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// While waiting, uses [`tokio::task::yield_now()`]
    ///
    /// # Note
    /// According to personal measurements, when using this option, the CPU load
    /// is 97-99%, so I do not recommend using it.
    Yield,

    /// While waiting, uses [`tokio::time::sleep()`]
    Sleep(Duration),
}

/// Connection-level limits and timeouts
///
/// Controls individual TCP connection behavior including timeouts,
/// lifetime, and request limits.
///
/// Default values balance performance, resource usage, and security.
/// Only change if you understand the consequences.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum duration to wait for reading data from socket (default: `2 seconds`)
    ///
    /// If no data is received within this time, connection is closed.
    /// This is the primary mechanism for cleaning up stalled connections.
    /// Prevents `slowloris attacks` and frees resources from inactive clients.
    pub socket_read_timeout: Duration,

    /// Maximum duration to wait for writing data to socket (default: `3 seconds`)
    ///
    /// If data can't be written in time, connection is terminated.
    /// Applies to individual write operations.
    pub socket_write_timeout: Duration,

    /// Maximum number of requests allowed per connection (default: `100`)
    ///
    /// Connection closes after processing this many requests.
    /// Helps prevent potential memory accumulation and maintains connection health.
    /// Combined with `connection_lifetime`, ensures connections don't live indefinitely.
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of connection from establishment to closure (default: `2 minutes`)
    ///
    /// Final safety net that guarantees no connection lives longer than this duration.
    /// In practice, connections are typically cleaned up by `socket_read_timeout`
    /// or `max_requests_per_connection` long before this limit is reached.
    pub connection_lifetime: Duration,

    /// Idle timeout applied while a connection sits in `SUSPENDED` (default: `60 seconds`)
    ///
    /// Distinct from `socket_read_timeout`, which only covers waiting for bytes on the
    /// wire: a suspended connection is not reading at all, so it is governed by this
    /// timer instead, tracked by the daemon's timer wheel.
    pub suspend_timeout: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(2),
            socket_write_timeout: Duration::from_secs(3),
            connection_lifetime: Duration::from_secs(120),
            max_requests_per_connection: 100,
            suspend_timeout: Duration::from_secs(60),

            _priv: (),
        }
    }
}

/// HTTP request parsing limits and buffer pre-allocation strategy
///
/// ⚠️ **SECURITY-FIRST DEFAULTS**
///
/// These limits are intentionally conservative to prevent resource exhaustion
/// and various parsing attacks. They work well for:
/// - Simple REST APIs
/// - Microservices
/// - Internal tools
/// - Low-memory environments
///
/// 🔧 **You MAY need to increase these if you see:**
/// - `413 Payload Too Large` for legitimate requests
/// - `414 URI Too Long` for normal API calls
/// - `431 Request Header Fields Too Large`
///
/// # Memory Allocation Strategy
///
/// Each TCP connection pre-allocates a fixed-size buffer based on these limits:
///
/// ```text
/// Total Buffer = First Line + (Headers × Header Line) + Body + Overhead
/// ```
///
/// # Example
/// ```
/// use embercore::limits::ReqLimits;
///
/// let limits = ReqLimits::default();
/// let buffer_size = limits.estimated_buffer_size();
/// println!("Each connection needs {} bytes for data buffer", buffer_size);
/// ```
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum URL length in bytes including path and query string (default: `256 B`)
    pub url_size: usize,
    /// Maximum number of path segments in URL (default: `8 segments`)
    pub url_parts: usize,
    /// Maximum query string length (default: `128`)
    pub url_query_size: usize,
    /// Maximum number of query parameters (default: `8`)
    pub url_query_parts: usize,

    /// Maximum number of headers per request (default: `16 headers`)
    pub header_count: usize,
    /// Maximum header name length in bytes (default: `64 B`)
    pub header_name_size: usize,
    /// Maximum header value length in bytes (default: `512 B`)
    pub header_value_size: usize,

    /// Maximum request body size in bytes, content-length or decoded-chunked
    /// (default: `4 KB`)
    pub body_size: usize,

    /// Minimum accumulation buffer used by [`PostProcessor`](crate::http::post::PostProcessor)
    /// keys before they're emitted (default: `256 B`); see spec §4.6.
    pub post_key_buffer: usize,

    /// Protocol parsing strictness (default: `Strictness::Default`).
    pub strictness: Strictness,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub precalc: ReqLimitsPrecalc,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            url_size: 256,
            url_parts: 8,
            url_query_size: 128,
            url_query_parts: 8,

            header_count: 16,
            header_name_size: 64,
            header_value_size: 512,

            body_size: 4 * 1024,
            post_key_buffer: 256,

            strictness: Strictness::Default,

            precalc: ReqLimitsPrecalc::default(),
        }
    }
}

impl ReqLimits {
    /// Returns the estimated memory buffer size required per connection.
    #[inline(always)]
    pub fn estimated_buffer_size(self) -> usize {
        self.precalculate().precalc.buffer
    }

    #[inline(always)]
    pub(crate) fn precalculate(mut self) -> Self {
        self.precalc.first_line = self.first_line();
        self.precalc.h_line = self.h_line();
        self.precalc.buffer = self.buffer();
        self.precalc.req_without_body = self.precalc.buffer - self.body_size;
        self.precalc.url_size_memchr = self.url_size + 1;

        self
    }

    #[inline(always)]
    // First line + Header * N + "\r\n" + Body
    fn buffer(&self) -> usize {
        self.precalc.first_line + self.header_count * self.precalc.h_line + 2 + self.body_size
    }

    #[inline(always)]
    // First line HTTP response:
    // CONNECT /url/test HTTP/1.1\r\n
    // |-----| |-------| |------|
    //  Method    URl    Version
    //
    // Formula: Method(7) + " " + URl + " " + Version(8) + "\r\n"
    // In Code: 19 + url_size
    fn first_line(&self) -> usize {
        19 + self.url_size
    }

    #[inline(always)]
    // Header:
    // Authorization: Sample%20Data\r\n
    // |-----------|  |-----------|
    //     Name           Value
    //
    // Formula: Name + ": " + Value +  "\r\n"
    // In Code: 4 + header_name_size + header_value_size
    fn h_line(&self) -> usize {
        self.header_name_size + self.header_value_size + 4
    }
}

#[doc(hidden)]
#[derive(Debug, Clone, Default)]
pub struct ReqLimitsPrecalc {
    pub(crate) buffer: usize,
    pub(crate) first_line: usize,
    pub(crate) req_without_body: usize,
    pub(crate) h_line: usize,
    pub(crate) url_size_memchr: usize,
}

/// Protocol parsing strictness, selected once via [`ReqLimits::strictness`].
///
/// Governs the handful of places where the RFC 7230 grammar is ambiguous or
/// where real-world clients deviate from it (see spec §4.2, §9.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Tolerates obsolete header-line folding and header names containing
    /// non-token characters.
    Permissive,
    /// RFC-conformant parsing; folding and non-token header names are rejected,
    /// but a missing `Host` header on HTTP/1.1 is tolerated.
    #[default]
    Default,
    /// As `Default`, plus: an HTTP/1.1 request without `Host` is rejected with `400`,
    /// and a request carrying both `Content-Length` and `Transfer-Encoding: chunked`
    /// is rejected with `400` instead of preferring the chunked framing.
    Strict,
}

/// Configuration for response processing and memory allocation limits.
///
/// Controls how response buffers are allocated and managed to balance
/// memory usage and performance.
///
/// # Buffer Management
///
/// Based on the configured limits, response buffers are managed as follows:
/// ```rust
/// # use embercore::limits::RespLimits;
/// # let limits = RespLimits::default();
/// # let mut buffer: Vec<()> = Vec::with_capacity(limits.default_capacity);
/// #
/// // `buffer` is Vec
/// if buffer.capacity() > limits.max_capacity {
///     buffer = Vec::with_capacity(limits.default_capacity);
/// } else {
///     buffer.clear();
/// }
/// ```
///
/// When the server starts, buffers are created with a capacity equal to `default_capacity`.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity allocated for responses (default: `1024 B`)
    pub default_capacity: usize,
    /// Maximum allowed buffer capacity for responses (default: `8192 B`)
    pub max_capacity: usize,
    /// Block size used when streaming an `Fd` or `Callback` body source
    /// (default: `16 KiB`); see spec §4.4.
    pub default_block_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 8 * 1024,
            default_block_size: 16 * 1024,

            _priv: (),
        }
    }
}

/// Daemon-wide options frozen at [`Server::build`](crate::Server) time; see spec §6.
///
/// Mirrors `daemon_set_options`'s flat option record. Anything connection- or
/// request-shaped lives in [`ServerLimits`]/[`ConnLimits`]/[`ReqLimits`]/[`RespLimits`]
/// instead; this struct covers daemon-lifecycle and scheduling concerns only.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// Answer `Expect: 100-continue` with an interim `100 Continue` before reading
    /// the upload body (default: `true`). Disabling this makes the application
    /// responsible for draining/ignoring the expectation.
    pub answer_expect_continue: bool,

    /// Disable the worker inter-thread-communication channel used for resume-from-
    /// suspend and explicit wakeups (default: `false`). Only meaningful under
    /// [`WorkMode::WorkerThreads`](crate::WorkMode::WorkerThreads); when set,
    /// `Action::Suspend`/`request_resume` are unavailable and return
    /// [`Error::ConfigurationError`](crate::errors::Error).
    pub disable_itc: bool,

    /// Grace period given to in-flight responses when
    /// [`ServerHandle::stop`](crate::ServerHandle::stop) is called before
    /// connections are forcibly closed (default: `5 seconds`).
    pub shutdown_grace: Duration,

    /// `TCP_FASTOPEN` policy applied to the listening socket at
    /// [`Server::build`](crate::Server) time (default: `TcpFastOpen::Off`).
    /// Only takes effect on platforms exposing the option (Linux); elsewhere
    /// it is silently ignored.
    pub tcp_fast_open: TcpFastOpen,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            answer_expect_continue: true,
            disable_itc: false,
            shutdown_grace: Duration::from_secs(5),
            tcp_fast_open: TcpFastOpen::Off,

            _priv: (),
        }
    }
}

/// `TCP_FASTOPEN` policy for the listening socket; mirrors
/// `daemon_set_options`'s `auto|require|off with queue length` option (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpFastOpen {
    /// Do not touch `TCP_FASTOPEN` on the listening socket.
    Off,
    /// Enable it with a conservative default queue length, ignoring failures
    /// (e.g. on platforms or kernels that don't support it).
    Auto,
    /// Enable it with the given queue length; a setup failure is only logged,
    /// never fatal.
    Require(u32),
}
