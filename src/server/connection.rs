use crate::{
    errors::ErrorKind,
    http::{
        post::{PostError, PostProcessor},
        request::{Parser, Request},
        response::Response,
        types::Version,
    },
    limits::{ConnLimits, DaemonOptions, ReqLimits, RespLimits, ServerLimits},
    pool::MemoryPool,
    server::action::{ActionKind, PostIterator, UploadAction, UploadCallback},
    server::server_impl::{AllLimits, Handler},
    Handled,
};
use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Instant};
use tokio::{io::AsyncWriteExt, net::TcpStream, time::sleep};
use tracing::{debug, trace, warn};

/// Size of the window delivered to a `ProcessUpload`/`ParsePost` callback on
/// each call; the whole body is already buffered by the time the handler
/// runs (spec §9.1), so this only bounds how many bytes a single callback
/// invocation sees, not how many times the socket is read.
const UPLOAD_CHUNK_SIZE: usize = 8 * 1024;

/// What happened to the TCP stream by the time [`HttpConnection::run`] returns.
/// `Upgraded` tells the caller to stop driving HTTP on this socket and hand it,
/// by value, to [`Handler::handle_upgrade`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ConnOutcome {
    Closed,
    Upgraded,
}

pub(crate) struct HttpConnection<H: Handler<S>, S: ConnectionData> {
    pub(crate) handler: Arc<H>,
    pub(crate) connection_data: S,

    connection: Connection,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,
    pub(crate) pool: MemoryPool,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
    pub(crate) daemon_options: DaemonOptions,
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn new(handler: Arc<H>, limits: AllLimits) -> Self {
        let mut response = Response::new(&limits.3);
        response.suppress_date = limits.0.suppress_date;
        response.suppress_server_header = limits.0.suppress_server_header;

        Self {
            handler,
            connection_data: S::new(),

            connection: Connection::new(),
            parser: Parser::new(&limits.2),
            request: Request::new(&limits.2),
            response,
            pool: MemoryPool::new(limits.2.body_size),

            server_limits: limits.0,
            conn_limits: limits.1,
            req_limits: limits.2,
            resp_limits: limits.3,
            daemon_options: limits.4,
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.resp_limits);
        self.response.suppress_date = self.server_limits.suppress_date;
        self.response.suppress_server_header = self.server_limits.suppress_server_header;
        self.pool.reset();
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) async fn run(
        &mut self,
        stream: &mut TcpStream,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<ConnOutcome, io::Error> {
        self.request.set_addrs(client_addr, server_addr);

        match self.impl_run(stream).await {
            Ok(outcome) => Ok(outcome),
            Err(ErrorKind::Io(e)) => {
                warn!(peer = %client_addr, error = %e.0, "connection write/read failed");
                Err(e.0)
            }
            Err(error) => {
                warn!(peer = %client_addr, ?error, "rejecting request with a canned error response");
                self.conn_limits
                    .send_error(
                        stream,
                        error,
                        self.request.version(),
                        self.server_limits.json_errors,
                    )
                    .await?;
                Ok(ConnOutcome::Closed)
            }
        }
    }

    #[inline]
    pub(crate) async fn impl_run(
        &mut self,
        stream: &mut TcpStream,
    ) -> Result<ConnOutcome, ErrorKind> {
        self.connection.reset();
        self.connection_data.reset();

        while !self.is_expired()? {
            self.reset_request_response();

            if self
                .parser
                .fill_buffer(stream, self.conn_limits.socket_read_timeout)
                .await?
                == 0
            {
                break;
            }
            self.response.version = self.parse()?;
            debug!(
                method = ?self.request.method(),
                path = %String::from_utf8_lossy(self.request.url().target()),
                "dispatching request"
            );

            let action = self
                .handler
                .handle(&mut self.connection_data, &self.request, &mut self.response)
                .await;

            match action.0 {
                ActionKind::Respond => {
                    self.conn_limits
                        .write_bytes(stream, self.response.buffer())
                        .await?;

                    if !self.response.keep_alive {
                        break;
                    }
                }
                ActionKind::Continue => {
                    if !self.response.keep_alive {
                        break;
                    }
                }
                ActionKind::Upgrade => {
                    self.conn_limits
                        .write_bytes(stream, self.response.buffer())
                        .await?;
                    debug!("connection upgraded");
                    return Ok(ConnOutcome::Upgraded);
                }
                ActionKind::Suspend => {
                    debug!("connection suspended");
                    sleep(self.conn_limits.suspend_timeout).await;
                    return Ok(ConnOutcome::Closed);
                }
                ActionKind::ProcessUpload(cb) => {
                    let outcome = self.drive_process_upload(cb);
                    if let Some(outcome) = self.finish_upload(stream, outcome).await? {
                        return Ok(outcome);
                    }
                }
                ActionKind::ParsePost(buffer_size, iter) => {
                    let outcome = self.drive_parse_post(buffer_size, iter)?;
                    if let Some(outcome) = self.finish_upload(stream, outcome).await? {
                        return Ok(outcome);
                    }
                }
                ActionKind::Abort => return Ok(ConnOutcome::Closed),
            }

            self.connection.request_count += 1;
        }

        Ok(ConnOutcome::Closed)
    }

    /// Delivers the already-buffered request body to `cb` in bounded
    /// windows, honoring a retained-unread-tail per call, then makes exactly
    /// one finalization call with an empty slice (spec §4.3/§8).
    #[inline]
    fn drive_process_upload(&mut self, mut cb: UploadCallback) -> UploadAction {
        let body = self.request.body().unwrap_or(&[]);

        let mut consumed = 0usize;
        let mut window_end = 0usize;

        while window_end < body.len() {
            window_end = (window_end + UPLOAD_CHUNK_SIZE).min(body.len());
            let chunk = &body[consumed..window_end];

            let mut unread = 0usize;
            let action = cb(chunk, &mut unread, &mut self.response);
            trace!(delivered = chunk.len(), unread, "upload chunk processed");
            if !matches!(action, UploadAction::Continue) {
                return action;
            }

            consumed = window_end - unread.min(chunk.len());
        }

        let mut unread = 0usize;
        match cb(&[], &mut unread, &mut self.response) {
            UploadAction::Continue => {
                warn!("upload finalization call returned Continue; closing connection");
                UploadAction::Abort
            }
            action => action,
        }
    }

    /// Like [`drive_process_upload`](Self::drive_process_upload), but decodes
    /// the body through a [`PostProcessor`] first and hands `iter` one
    /// [`PostEvent`](crate::PostEvent) at a time instead of raw chunks.
    #[inline]
    fn drive_parse_post(
        &mut self,
        buffer_size: usize,
        mut iter: PostIterator,
    ) -> Result<UploadAction, ErrorKind> {
        let content_type = self.request.header(b"content-type").unwrap_or(&[]);
        let mut processor = PostProcessor::new(content_type, buffer_size).map_err(map_post_error)?;

        let body = self.request.body().unwrap_or(&[]);
        let mut window_end = 0usize;
        let mut terminal: Option<UploadAction> = None;

        while window_end < body.len() {
            window_end = (window_end + UPLOAD_CHUNK_SIZE).min(body.len());

            let response = &mut self.response;
            processor
                .feed(&body[..window_end], |ev| {
                    if terminal.is_some() {
                        return;
                    }
                    let action = iter(ev, response);
                    if !matches!(action, UploadAction::Continue) {
                        terminal = Some(action);
                    }
                })
                .map_err(map_post_error)?;

            if let Some(action) = terminal {
                return Ok(action);
            }
        }

        let response = &mut self.response;
        processor
            .finish(body, |ev| {
                if terminal.is_some() {
                    return;
                }
                let action = iter(ev, response);
                if !matches!(action, UploadAction::Continue) {
                    terminal = Some(action);
                }
            })
            .map_err(map_post_error)?;

        Ok(terminal.unwrap_or(UploadAction::Abort))
    }

    /// Turns the final [`UploadAction`] of a `ProcessUpload`/`ParsePost` drive
    /// into the same write/keep-alive/suspend handling `ActionKind::Respond`
    /// gets. Returns `Some(outcome)` when `impl_run` should return
    /// immediately, `None` when it should loop for the next request.
    #[inline]
    async fn finish_upload(
        &mut self,
        stream: &mut TcpStream,
        action: UploadAction,
    ) -> Result<Option<ConnOutcome>, ErrorKind> {
        match action {
            UploadAction::Respond(_handled) => {
                self.conn_limits
                    .write_bytes(stream, self.response.buffer())
                    .await?;

                if !self.response.keep_alive {
                    return Ok(Some(ConnOutcome::Closed));
                }
                Ok(None)
            }
            UploadAction::Suspend => {
                sleep(self.conn_limits.suspend_timeout).await;
                Ok(Some(ConnOutcome::Closed))
            }
            UploadAction::Abort | UploadAction::Continue => Ok(Some(ConnOutcome::Closed)),
        }
    }
}

fn map_post_error(err: PostError) -> ErrorKind {
    match err {
        PostError::UnsupportedContentType | PostError::MissingBoundary => {
            ErrorKind::UnsupportedMediaType
        }
        PostError::KeyTooLarge(_) => ErrorKind::BodyTooLarge,
        PostError::InvalidUtf8 => ErrorKind::InvalidUtf8,
    }
}

impl ConnLimits {
    #[inline]
    pub(crate) async fn send_error(
        &self,
        stream: &mut TcpStream,
        error: ErrorKind,
        version: Version,
        json_errors: bool,
    ) -> Result<(), io::Error> {
        self.write_bytes(stream, error.as_http(version, json_errors))
            .await
    }

    #[inline]
    pub(crate) async fn write_bytes(
        &self,
        stream: &mut TcpStream,
        response: &[u8],
    ) -> Result<(), io::Error> {
        tokio::select! {
            biased;

            result = stream.write_all(response) => result,
            _ = sleep(self.socket_write_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
            },
        }
    }
}

macro_rules! is_expired {
    ($self:expr, $limits:expr) => {
        Ok(!$self.response.keep_alive
            || $self.connection.request_count >= $limits.max_requests_per_connection
            || $self.connection.created.elapsed() > $limits.connection_lifetime)
    };
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn is_expired(&self) -> Result<bool, ErrorKind> {
        is_expired!(self, self.conn_limits)
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
}

//

/// Managing user session data stored between requests within a single HTTP connection.
///
/// This trait allows you to store arbitrary state (e.g., authentication data,
/// multistep form status, cache, etc.). The state is available across all requests
/// within a single HTTP keep-alive connection.
///
/// # Examples
/// ```no_run
/// use embercore::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear(); // Saving the allocated memory
///     }
/// }
/// ```
///
/// Check out a [real-world example
/// ](https://github.com/AmakeSashaDev/embercore/blob/main/examples/request_counter.rs)
/// (well, almost)
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// It is called once at server startup, which avoids runtime allocations.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// It is called after the connection is closed. Allows repeated
    /// use of the instance for the following connections. If implemented
    /// correctly, avoids any allocations.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// # Examples
///
/// Simple IP Blacklist:
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use embercore::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
/// File-based IP blacklist:
/// ```
/// use std::net::SocketAddr;
/// use embercore::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     db: DatabaseClient
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
///         Ok(())
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// Two-stage filtering with cache:
/// ```
/// use std::{collections::HashSet, sync::RwLock, net::{SocketAddr, IpAddr}};
/// use embercore::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     cache: RwLock<HashSet<IpAddr>>,
///     db: DatabaseClient,
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         let Ok(guard) = self.cache.read() else {
///             return Err(err_resp.status(StatusCode::InternalServerError)
///                 .body("Internal server error"));
///         };
///
///         if guard.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             let Ok(mut guard) = self.cache.write() else {
///                 return Err(err_resp.status(StatusCode::InternalServerError)
///                     .body("Internal server error"));
///             };
///             guard.insert(client_addr.ip());
///
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// # Connection Filter Architecture
/// ```text
///                     [ QUEUE TCP_STREAM ]
///                              ||
/// /----------------------------||----------------------------------\
/// |                            || TCP_STREAM            Tokio Task |
/// |       /=====================/                                  |
/// |       \/                                                       |
/// |   [--------]   Err(Handled)   [----------------------]         |
/// |   [ filter ] ===============> [ Send `error_response`]         |
/// |   [--------]                  [----------------------]         |
/// |       ||                                 /\                    |
/// |       || Ok(())                          ||                    |
/// |       \/                Err(Handled)     ||                    |
/// |   [--------------] ========================/                   |
/// |   [ filter_async ]                             [-----------]   |
/// |   [--------------] ==========================> [  Handler  ]   |
/// |                             Ok(())             [-----------]   |
/// |                                                                |
/// \----------------------------------------------------------------/
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Synchronous connection validation.
    ///
    /// Perform fast, in-memory checks here. Expensive operations should be deferred
    /// to [`filter_async`](Self::filter_async).
    ///
    /// Use for:
    /// - IP blacklist/whitelist (in-memory cache)
    /// - Geographic IP restrictions
    /// - Rate limiting counters
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;

    /// Asynchronous connection inspection.
    ///
    /// Called after [`filter`](Self::filter) succeeds.Executes asynchronously within
    /// the Tokio runtime.
    ///
    /// Use for:
    /// - Database lookups
    /// - External API calls
    /// - File system operations
    /// - Complex business logic
    /// - Machine learning inference
    fn filter_async(
        &self,
        #[allow(unused_variables)] client_addr: SocketAddr,
        #[allow(unused_variables)] server_addr: SocketAddr,
        #[allow(unused_variables)] error_response: &mut Response,
    ) -> impl Future<Output = Result<(), Handled>> + Send {
        async { Ok(()) }
    }
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

//

#[cfg(test)]
mod def_handler {
    use super::*;
    use crate::StatusCode;

    pub(crate) struct DefHandler;

    impl Handler<()> for DefHandler {
        async fn handle(&self, _: &mut (), _: &Request, r: &mut Response) -> crate::Action {
            crate::Action::respond(r.status(StatusCode::Ok).body("test"))
        }
    }

    impl HttpConnection<DefHandler, ()> {
        #[inline]
        pub(crate) fn from_req<V: AsRef<[u8]>>(value: V) -> Self {
            Self::from_req_with_limits(value, ReqLimits::default())
        }

        #[inline]
        pub(crate) fn from_req_with_limits<V: AsRef<[u8]>>(value: V, req_limits: ReqLimits) -> Self {
            let req_limits = req_limits.precalculate();
            let resp_limits = RespLimits::default();

            Self {
                handler: Arc::new(DefHandler),
                connection_data: (),

                connection: Connection::new(),
                parser: Parser::from(&req_limits, value),
                request: Request::new(&req_limits),
                response: Response::new(&resp_limits),
                pool: MemoryPool::new(req_limits.body_size),

                server_limits: ServerLimits::default(),
                conn_limits: ConnLimits::default(),
                req_limits,
                resp_limits,
                daemon_options: DaemonOptions::default(),
            }
        }
    }
}
