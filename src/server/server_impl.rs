use crate::{
    errors::ErrorKind,
    http::{
        request::Request,
        response::{Handled, Response},
    },
    limits::{ConnLimits, DaemonOptions, ReqLimits, RespLimits, ServerLimits, TcpFastOpen, WaitStrategy},
    server::action::Action,
    server::connection::{ConnOutcome, ConnectionData, HttpConnection},
    server::upgrade::UpgradeHandle,
    ConnectionFilter, Version,
};
use crossbeam::queue::SegQueue;
use std::{
    future::Future,
    marker::{PhantomData, Send, Sync},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{oneshot, Notify},
    task::{yield_now, JoinHandle},
    time::{interval as tokio_interval, sleep as tokio_sleep, timeout},
};
use tracing::{debug, warn};

/// A trait for handling HTTP requests and generating responses.
///
/// You can use:
/// - `&self` for shared immutable data (e.g. database connection pool, router configuration)
/// - `&mut S` for connection-specific mutable state (e.g. authentication tokens, session data)
///
/// # Examples
///
/// Basic Request Handler
/// ```
/// use embercore::{Handler, Request, Response, Action, StatusCode};
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, _: &mut (), req: &Request, resp: &mut Response) -> Action {
///         // Simple echo handler
///         let handled = if req.url().target() == b"/echo" {
///             resp.status(StatusCode::Ok).body("Echo response")
///         } else {
///             resp.status(StatusCode::NotFound).body("Not found :(")
///         };
///         Action::respond(handled)
///     }
/// }
/// ```
/// Handler with [`ConnectionData`]
/// ```
/// use embercore::{Handler, ConnectionData, Request, Response, Action, StatusCode};
///
/// struct CountingHandler;
///
/// impl Handler<State> for CountingHandler {
///     async fn handle(&self, data: &mut State, req: &Request, resp: &mut Response) -> Action {
///         data.request_count += 1;
///
///         Action::respond(resp
///             .status(StatusCode::Ok)
///             .body(format!("Request #{}", data.request_count)))
///     }
/// }
///
/// struct State {
///     request_count: usize,
/// }
///
/// impl ConnectionData for State {
///     fn new() -> Self {
///         Self { request_count: 0 }
///     }
///
///     fn reset(&mut self) {
///         self.request_count = 0;
///     }
/// }
/// ```
pub trait Handler<S = ()>
where
    Self: Sync + Send + 'static,
    S: ConnectionData,
{
    /// Processes an HTTP request and generates a response.
    ///
    /// # Parameters
    ///
    /// - `connection_data`: Mutable reference to connection-specific state
    /// - `req`: Immutable reference to the parsed HTTP request
    /// - `resp`: Mutable response builder for constructing the response
    ///
    /// # Returns
    ///
    /// An [`Action`] telling the connection driver what to do next: send the
    /// response and keep going (`Action::respond`), park the connection
    /// (`Action::suspend`), hand the socket off after a protocol switch
    /// (`Action::upgrade`), or drop it without replying (`Action::abort`).
    ///
    /// # Errors
    ///
    /// Implementations should handle errors internally and set appropriate
    /// HTTP status codes on the response. Panics will terminate the connection.
    fn handle(
        &self,
        connection_data: &mut S,
        request: &Request,
        response: &mut Response,
    ) -> impl Future<Output = Action> + Send;

    /// Takes over a raw socket after an [`Action::upgrade`] response has been
    /// flushed. The default implementation simply drops the handle, closing
    /// the connection; override it to speak the switched-to protocol.
    #[inline]
    fn handle_upgrade(
        &self,
        connection_data: &mut S,
        handle: UpgradeHandle,
    ) -> impl Future<Output = ()> + Send {
        let _ = connection_data;
        async move {
            drop(handle);
        }
    }
}

/// Selects how accepted connections are scheduled onto worker tasks; see spec §4.5.
///
/// All four modes share the same per-connection [`HttpConnection`] driver; they
/// differ only in how background tasks are spawned at [`Server::build`] time
/// and how they drain the shared admission queue.
#[derive(Debug, Clone)]
pub enum WorkMode {
    /// `max_connections` reused [`HttpConnection`] workers continuously pop
    /// from the shared admission queue, each serving one connection to
    /// completion before looping back for the next (default).
    WorkerThreads(usize),

    /// A single dispatcher task pops connections from the queue and spawns a
    /// fresh ephemeral task (with its own `HttpConnection`) per connection,
    /// unbounded by `max_connections`.
    ThreadPerConnection,

    /// A single worker drains the entire queue every tick of a
    /// [`tokio::time::interval`], rather than polling continuously.
    ExternalPeriodic(Duration),

    /// A single worker drains the queue using cooperative
    /// [`tokio::task::yield_now`] polling regardless of `ServerLimits::wait_strategy`.
    ExternalEvents,
}

impl Default for WorkMode {
    #[inline(always)]
    fn default() -> Self {
        WorkMode::WorkerThreads(100)
    }
}

/// An HTTP server that processes incoming connections and requests.
///
/// The server uses a pre-allocated connection pool for maximum performance
/// and implements graceful connection handling with configurable limits.
///
/// # Examples
///
/// ```no_run
/// use embercore::{Server, Handler, Request, Response, Action, StatusCode};
/// use tokio::net::TcpListener;
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Action {
///         Action::respond(resp.status(StatusCode::Ok).body("Hello world!"))
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .handler(MyHandler)
///         .build()
///         .launch()
///         .await
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    stream_queue: TcpQueue,
    error_queue: TcpQueue,
    server_limits: ServerLimits,
    daemon_options: DaemonOptions,
    shutdown: Arc<ShutdownState>,
    quiesce_waiter: QuiesceWaiter,
    worker_handles: Vec<JoinHandle<()>>,
}

/// Shared accept-loop/worker-loop lifecycle flags; see spec §4.5/§4.8/§6.
#[derive(Debug, Default)]
pub(crate) struct ShutdownState {
    /// No new connections are accepted, but already-admitted ones keep running.
    quiesced: AtomicBool,
    /// Workers stop popping new connections from the queue once observed;
    /// see [`ServerHandle::stop`].
    stopped: AtomicBool,
    notify: Notify,
}

impl ShutdownState {
    #[inline(always)]
    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

type QuiesceWaiter = Arc<StdMutex<Option<oneshot::Sender<TcpListener>>>>;

/// A cloneable handle for quiescing or stopping a [`Server`] from outside the
/// task driving [`Server::launch`]; see spec §3/§6.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<ShutdownState>,
    quiesce_waiter: QuiesceWaiter,
}

impl ServerHandle {
    /// Stops accepting new connections, but leaves already-admitted
    /// connections running to completion; resolves to the detached listen
    /// socket once `launch`'s accept loop observes the request.
    pub async fn quiesce(&self) -> Option<TcpListener> {
        let (tx, rx) = oneshot::channel();
        *self.quiesce_waiter.lock().unwrap() = Some(tx);
        self.shutdown.quiesced.store(true, Ordering::Release);
        self.shutdown.notify.notify_waiters();
        rx.await.ok()
    }

    /// Requests a full shutdown: implies `quiesce`, and additionally has
    /// every worker stop popping new connections from the admission queue
    /// (observed at each poll wakeup), draining in-progress ones for up to
    /// `DaemonOptions::shutdown_grace` before `launch` returns. An
    /// in-progress [`Action::upgrade`](crate::Action::upgrade) handle is not
    /// cancelled by this.
    pub fn stop(&self) {
        self.shutdown.quiesced.store(true, Ordering::Release);
        self.shutdown.stopped.store(true, Ordering::Release);
        self.shutdown.notify.notify_waiters();
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.shutdown.stopped.load(Ordering::Acquire)
    }
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # embercore::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use tokio::net::TcpListener;
    /// use embercore::Server;
    ///
    /// let server = Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build();
    /// # }
    /// ```
    #[inline]
    pub fn builder<H, S>() -> ServerBuilder<H, S, ()>
    where
        H: Handler<S>,
        S: ConnectionData,
    {
        ServerBuilder {
            listener: None,
            handler: None,
            connection_filter: Arc::new(()),
            _marker: PhantomData,

            server_limits: None,
            request_limits: None,
            response_limits: None,
            connection_limits: None,
            daemon_options: None,
            work_mode: None,
        }
    }

    /// Starts the server and begins accepting incoming connections.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # embercore::impt_default_handler!{ MyStruct }
    /// # #[tokio::main]
    /// # async fn main() {
    /// use embercore::Server;
    /// use tokio::net::TcpListener;
    ///
    /// Server::builder()
    ///     .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
    ///     .handler(MyStruct) // structure with Handler implementation
    ///     .build()
    ///     .launch()
    ///     .await
    /// # }
    /// ```
    /// Returns a cloneable [`ServerHandle`] for quiescing or stopping the
    /// server from another task while this one drives [`launch`](Self::launch).
    #[inline]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
            quiesce_waiter: self.quiesce_waiter.clone(),
        }
    }

    #[inline]
    pub async fn launch(self) {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notify.notified() => {
                    if self.shutdown.quiesced.load(Ordering::Acquire) {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    let Ok(value) = accepted else {
                        warn!("accept() failed");
                        continue;
                    };

                    match self.stream_queue.len() < self.server_limits.max_pending_connections {
                        true => self.stream_queue.push(value),
                        false => self.error_queue.push(value),
                    }
                }
            }
        }

        debug!("accept loop quiesced");

        if let Some(tx) = self.quiesce_waiter.lock().unwrap().take() {
            let _ = tx.send(self.listener);
            return;
        }

        if self.shutdown.stopped.load(Ordering::Acquire) {
            let grace = self.daemon_options.shutdown_grace;
            let _ = timeout(grace, async {
                for worker in self.worker_handles {
                    let _ = worker.await;
                }
            })
            .await;
            debug!("server stopped");
        }
    }

    #[inline]
    async fn get_stream(
        queue: &TcpQueue,
        wait: &WaitStrategy,
        shutdown: &ShutdownState,
    ) -> Option<(TcpStream, SocketAddr)> {
        loop {
            if let Some(value) = queue.pop() {
                return Some(value);
            }
            if shutdown.is_stopped() {
                return None;
            }

            match wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    listener: Option<TcpListener>,
    handler: Option<Arc<H>>,
    connection_filter: Arc<F>,
    _marker: PhantomData<S>,

    server_limits: Option<ServerLimits>,
    request_limits: Option<ReqLimits>,
    response_limits: Option<RespLimits>,
    connection_limits: Option<ConnLimits>,
    daemon_options: Option<DaemonOptions>,
    work_mode: Option<WorkMode>,
}

impl<H, S, F> ServerBuilder<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    /// Sets the TCP listener that the server will use to accept connections.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the request handler that will process incoming requests.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Installs a connection filter to check incoming TCP connections
    /// before using it.
    ///
    /// Allows early rejection of unwanted IP addresses (before the
    /// first read). Can be used for DDoS protection, geobanning, etc.
    ///
    /// For more information, see [ConnectionFilter](crate::ConnectionFilter)
    #[inline(always)]
    pub fn conn_filter<NewF>(self, filter: NewF) -> ServerBuilder<H, S, NewF>
    where
        NewF: ConnectionFilter,
    {
        ServerBuilder {
            listener: self.listener,
            handler: self.handler,
            connection_filter: Arc::new(filter),
            _marker: self._marker,
            server_limits: self.server_limits,
            request_limits: self.request_limits,
            response_limits: self.response_limits,
            connection_limits: self.connection_limits,
            daemon_options: self.daemon_options,
            work_mode: self.work_mode,
        }
    }

    /// Configures server-level concurrency, queueing, and overload limits.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures connection-level timeouts and lifetime limits.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request parsing and processing limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Configures response processing limits.
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.response_limits = Some(limits);
        self
    }

    /// Configures daemon-wide options: `Expect: 100-continue` policy, ITC,
    /// and shutdown grace; see [`DaemonOptions`].
    #[inline(always)]
    pub fn daemon_options(mut self, options: DaemonOptions) -> Self {
        self.daemon_options = Some(options);
        self
    }

    /// Selects the connection scheduling strategy; see [`WorkMode`].
    #[inline(always)]
    pub fn work_mode(mut self, mode: WorkMode) -> Self {
        self.work_mode = Some(mode);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Error messages:
    /// - ``The `listener` method must be called to create``
    /// - ``The `handler` method must be called to create``
    ///
    /// Panics when:
    /// - The `listener` method was not called.
    /// - The `handler` method was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let (listener, handler, filter, limits, work_mode) = self.get_all_parts();

        apply_tcp_fast_open(&listener, limits.4.tcp_fast_open);

        let stream_queue = Arc::new(SegQueue::new());
        let error_queue = Arc::new(SegQueue::new());
        let shutdown = Arc::new(ShutdownState::default());
        let mut worker_handles = Vec::new();

        if !limits.0.suppress_date {
            crate::http::date::spawn_refresher();
        }

        match work_mode {
            WorkMode::WorkerThreads(count) => {
                for _ in 0..count {
                    worker_handles.push(Self::spawn_worker(
                        &stream_queue,
                        &limits,
                        &filter,
                        &handler,
                        &shutdown,
                    ));
                }
            }
            WorkMode::ThreadPerConnection => {
                worker_handles.push(Self::spawn_dispatcher(
                    &stream_queue,
                    &limits,
                    &filter,
                    &handler,
                    &shutdown,
                ));
            }
            WorkMode::ExternalPeriodic(period) => {
                worker_handles.push(Self::spawn_periodic_worker(
                    &stream_queue,
                    &limits,
                    &filter,
                    &handler,
                    period,
                    &shutdown,
                ));
            }
            WorkMode::ExternalEvents => {
                worker_handles.push(Self::spawn_cooperative_worker(
                    &stream_queue,
                    &limits,
                    &filter,
                    &handler,
                    &shutdown,
                ));
            }
        }

        if limits.0.count_503_handlers != 0 {
            for _ in 0..limits.0.count_503_handlers {
                Self::spawn_alarmist(&error_queue, &limits, &shutdown);
            }
        } else {
            Self::spawn_quiet_alarmist(&error_queue, &limits, &shutdown);
        }

        Server {
            listener,
            stream_queue,
            error_queue,
            server_limits: limits.0,
            daemon_options: limits.4.clone(),
            shutdown,
            quiesce_waiter: Arc::new(StdMutex::new(None)),
            worker_handles,
        }
    }

    /// Runs one request/response cycle (and, on upgrade, hands the socket to
    /// [`Handler::handle_upgrade`]) for whatever connection `conn` is currently
    /// bound to. Shared by every [`WorkMode`]'s spawn strategy.
    #[inline]
    async fn drive(
        conn: &mut HttpConnection<H, S>,
        mut stream: TcpStream,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) {
        match conn.run(&mut stream, client_addr, server_addr).await {
            Ok(ConnOutcome::Upgraded) => {
                let handle = UpgradeHandle::new(stream, conn.conn_limits.socket_read_timeout);
                conn.handler
                    .handle_upgrade(&mut conn.connection_data, handle)
                    .await;
            }
            Ok(ConnOutcome::Closed) | Err(_) => {}
        }
    }

    #[inline]
    fn accept_or_reject(
        conn: &mut HttpConnection<H, S>,
        filter: &F,
        addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> bool {
        filter.filter(addr, local_addr, &mut conn.response).is_ok()
    }

    #[inline]
    fn spawn_worker(
        queue: &TcpQueue,
        limits: &AllLimits,
        filter: &Arc<F>,
        handler: &Arc<H>,
        shutdown: &Arc<ShutdownState>,
    ) -> JoinHandle<()> {
        let queue = queue.clone();
        let filter = filter.clone();
        let mut conn = HttpConnection::new(handler.clone(), limits.clone());
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            loop {
                if shutdown.is_stopped() {
                    debug!("worker stopping: shutdown requested");
                    break;
                }

                let Some((mut stream, addr)) =
                    Server::get_stream(&queue, &conn.server_limits.wait_strategy, &shutdown).await
                else {
                    break;
                };

                let Ok(local_addr) = stream.local_addr() else {
                    continue;
                };

                if !Self::accept_or_reject(&mut conn, &filter, addr, local_addr)
                    || filter
                        .filter_async(addr, local_addr, &mut conn.response)
                        .await
                        .is_err()
                {
                    debug!(peer = %addr, "connection rejected by filter");
                    let _ = conn
                        .conn_limits
                        .write_bytes(&mut stream, conn.response.buffer())
                        .await;

                    conn.response.reset(&conn.resp_limits);
                    continue;
                }

                Self::drive(&mut conn, stream, addr, local_addr).await;
            }
        })
    }

    /// [`WorkMode::ThreadPerConnection`]: one dispatcher pops connections and
    /// spawns a fresh ephemeral task, each with its own `HttpConnection`, per
    /// connection popped.
    #[inline]
    fn spawn_dispatcher(
        queue: &TcpQueue,
        limits: &AllLimits,
        filter: &Arc<F>,
        handler: &Arc<H>,
        shutdown: &Arc<ShutdownState>,
    ) -> JoinHandle<()> {
        let queue = queue.clone();
        let filter = filter.clone();
        let limits = limits.clone();
        let handler = handler.clone();
        let wait_strategy = limits.0.wait_strategy.clone();
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            loop {
                if shutdown.is_stopped() {
                    debug!("dispatcher stopping: shutdown requested");
                    break;
                }

                let Some((mut stream, addr)) =
                    Server::get_stream(&queue, &wait_strategy, &shutdown).await
                else {
                    break;
                };

                let Ok(local_addr) = stream.local_addr() else {
                    continue;
                };

                let filter = filter.clone();
                let mut conn = HttpConnection::new(handler.clone(), limits.clone());

                tokio::spawn(async move {
                    if !Self::accept_or_reject(&mut conn, &filter, addr, local_addr)
                        || filter
                            .filter_async(addr, local_addr, &mut conn.response)
                            .await
                            .is_err()
                    {
                        let _ = conn
                            .conn_limits
                            .write_bytes(&mut stream, conn.response.buffer())
                            .await;
                        return;
                    }

                    Self::drive(&mut conn, stream, addr, local_addr).await;
                });
            }
        })
    }

    /// [`WorkMode::ExternalPeriodic`]: a single worker drains the whole queue
    /// on every tick of a [`tokio::time::interval`] rather than polling continuously.
    #[inline]
    fn spawn_periodic_worker(
        queue: &TcpQueue,
        limits: &AllLimits,
        filter: &Arc<F>,
        handler: &Arc<H>,
        period: Duration,
        shutdown: &Arc<ShutdownState>,
    ) -> JoinHandle<()> {
        let queue = queue.clone();
        let filter = filter.clone();
        let mut conn = HttpConnection::new(handler.clone(), limits.clone());
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio_interval(period);

            loop {
                if shutdown.is_stopped() {
                    debug!("periodic worker stopping: shutdown requested");
                    break;
                }
                ticker.tick().await;

                while let Some((mut stream, addr)) = queue.pop() {
                    let Ok(local_addr) = stream.local_addr() else {
                        continue;
                    };

                    if !Self::accept_or_reject(&mut conn, &filter, addr, local_addr)
                        || filter
                            .filter_async(addr, local_addr, &mut conn.response)
                            .await
                            .is_err()
                    {
                        let _ = conn
                            .conn_limits
                            .write_bytes(&mut stream, conn.response.buffer())
                            .await;
                        conn.response.reset(&conn.resp_limits);
                        continue;
                    }

                    Self::drive(&mut conn, stream, addr, local_addr).await;
                }
            }
        })
    }

    /// [`WorkMode::ExternalEvents`]: a single worker, draining the queue via
    /// forced cooperative [`yield_now`] regardless of `ServerLimits::wait_strategy`.
    #[inline]
    fn spawn_cooperative_worker(
        queue: &TcpQueue,
        limits: &AllLimits,
        filter: &Arc<F>,
        handler: &Arc<H>,
        shutdown: &Arc<ShutdownState>,
    ) -> JoinHandle<()> {
        let queue = queue.clone();
        let filter = filter.clone();
        let mut conn = HttpConnection::new(handler.clone(), limits.clone());
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            loop {
                if shutdown.is_stopped() {
                    debug!("cooperative worker stopping: shutdown requested");
                    break;
                }

                let Some((mut stream, addr)) = queue.pop() else {
                    yield_now().await;
                    continue;
                };

                let Ok(local_addr) = stream.local_addr() else {
                    continue;
                };

                if !Self::accept_or_reject(&mut conn, &filter, addr, local_addr)
                    || filter
                        .filter_async(addr, local_addr, &mut conn.response)
                        .await
                        .is_err()
                {
                    let _ = conn
                        .conn_limits
                        .write_bytes(&mut stream, conn.response.buffer())
                        .await;
                    conn.response.reset(&conn.resp_limits);
                    continue;
                }

                Self::drive(&mut conn, stream, addr, local_addr).await;
            }
        })
    }

    #[inline]
    fn spawn_alarmist(queue: &TcpQueue, limits: &AllLimits, shutdown: &Arc<ShutdownState>) {
        let queue = queue.clone();
        let (server_limits, conn_limits, ..) = limits.clone();
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            loop {
                let Some((mut stream, _)) =
                    Server::get_stream(&queue, &server_limits.wait_strategy, &shutdown).await
                else {
                    break;
                };

                let _ = conn_limits
                    .send_error(
                        &mut stream,
                        ErrorKind::ServiceUnavailable,
                        Version::Http11,
                        server_limits.json_errors,
                    )
                    .await;
            }
        });
    }

    #[inline]
    fn spawn_quiet_alarmist(queue: &TcpQueue, limits: &AllLimits, shutdown: &Arc<ShutdownState>) {
        let queue = queue.clone();
        let (server_limits, ..) = limits.clone();
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            loop {
                let Some((stream, _)) =
                    Server::get_stream(&queue, &server_limits.wait_strategy, &shutdown).await
                else {
                    break;
                };

                drop(stream);
            }
        });
    }

    #[inline]
    #[track_caller]
    fn get_all_parts(self) -> (TcpListener, Arc<H>, Arc<F>, AllLimits, WorkMode) {
        (
            self.listener
                .expect("The `listener` method must be called to create"),
            self.handler
                .expect("The `handler` method must be called to create"),
            self.connection_filter,
            (
                self.server_limits.clone().unwrap_or_default(),
                self.connection_limits.clone().unwrap_or_default(),
                self.request_limits
                    .clone()
                    .unwrap_or_default()
                    .precalculate(),
                self.response_limits.clone().unwrap_or_default(),
                self.daemon_options.clone().unwrap_or_default(),
            ),
            self.work_mode.unwrap_or_default(),
        )
    }
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;
pub(crate) type AllLimits = (
    ServerLimits,
    ConnLimits,
    ReqLimits,
    RespLimits,
    DaemonOptions,
);

/// Applies `TcpFastOpen` to the listening socket via a raw `setsockopt`
/// (spec §6); only wired up on Linux, where the kernel actually exposes the
/// option through `socket2`.
#[cfg(target_os = "linux")]
fn apply_tcp_fast_open(listener: &TcpListener, mode: TcpFastOpen) {
    let qlen: u32 = match mode {
        TcpFastOpen::Off => return,
        TcpFastOpen::Auto => 128,
        TcpFastOpen::Require(qlen) => qlen,
    };

    let socket = socket2::SockRef::from(listener);
    match socket.set_tcp_fastopen(qlen) {
        Ok(()) => debug!(qlen, "TCP_FASTOPEN enabled on listener"),
        Err(err) => warn!(%err, "failed to enable TCP_FASTOPEN on listener"),
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_tcp_fast_open(_listener: &TcpListener, _mode: TcpFastOpen) {}
