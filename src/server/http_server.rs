//! HTTP server implementation.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, RwLock};
use tokio_rustls::TlsAcceptor;

use crate::parser::{parse_request, Error as ParserError, FrameStatus, HttpRequest, Method, RequestFramer};
use crate::server::config::{ServerConfig, VirtualHostConfig};
use crate::server::connection::{ActiveClients, ClientGuard};
use crate::server::context::ServerContext;
use crate::server::dispatcher::Dispatcher;
use crate::server::error::Error;
use crate::server::rate_limiter::RateLimiter;
use crate::server::response::{HttpResponse, StatusCode};
use crate::server::router::Router;
use crate::server::static_files::StaticFiles;
use crate::server::tls::build_tls_acceptor;

/// Body sent to clients over their request budget.
pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// Body sent when a handler panics.
pub const PANIC_MESSAGE: &str = "500 Internal Server Error";

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// An HTTP or HTTPS server.
///
/// Routes are registered before [`start`](Self::start), which binds the
/// listener and runs the accept loop until [`stop`](Self::stop) is called
/// from another task. Every connection is handled by the dispatcher's worker
/// pool and carries exactly one request.
pub struct HttpServer {
    context: ServerContext,
    router: Arc<RwLock<Router>>,
    rate_limiter: Arc<RateLimiter>,
    dispatcher: Dispatcher,
    active_clients: Arc<ActiveClients>,
    running: AtomicBool,
    shutdown: Notify,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_context(ServerContext::new(config))
    }

    /// Create a server from a prepared context.
    pub fn with_context(context: ServerContext) -> Self {
        let rate_limiter = RateLimiter::new(context.config.max_requests_per_minute);
        let dispatcher = Dispatcher::new(context.config.workers);
        Self {
            context,
            router: Arc::new(RwLock::new(Router::new())),
            rate_limiter: Arc::new(rate_limiter),
            dispatcher,
            active_clients: Arc::new(ActiveClients::new()),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
            local_addr: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Direct access to the router.
    pub fn router(&self) -> &Arc<RwLock<Router>> {
        &self.router
    }

    /// Add a route to the server.
    pub async fn add_route<F, Fut>(&self, path: &str, method: Method, handler: F) -> Result<(), Error>
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        self.router.write().await.add_route(path, method, handler)
    }

    /// Register one handler for several paths.
    pub async fn add_routes<F, Fut>(&self, paths: &[&str], method: Method, handler: F) -> Result<(), Error>
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        self.router.write().await.add_routes(paths, method, handler)
    }

    pub async fn add_middleware<F>(&self, middleware: F)
    where
        F: Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
    {
        self.router.write().await.add_middleware(middleware);
    }

    pub async fn set_not_found_handler<F>(&self, handler: F)
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        self.router.write().await.set_not_found_handler(handler);
    }

    pub async fn set_exception_handler<F>(&self, handler: F)
    where
        F: Fn(&HttpRequest, &Error) -> HttpResponse + Send + Sync + 'static,
    {
        self.router.write().await.set_exception_handler(handler);
    }

    /// Whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of connections currently tracked.
    pub fn active_client_count(&self) -> usize {
        self.active_clients.len()
    }

    /// The address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A handle that serves single connections with this server's state.
    pub fn connection_handler(&self) -> ConnectionHandler {
        ConnectionHandler {
            context: self.context.clone(),
            router: Arc::clone(&self.router),
            rate_limiter: Arc::clone(&self.rate_limiter),
        }
    }

    /// Start the server and serve connections until [`stop`](Self::stop) is called.
    ///
    /// Returns once the listener is closed and every queued connection has
    /// been handled.
    pub async fn start(&self) -> Result<(), Error> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        let result = self.serve().await;
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = &result {
            error!("Server failed: {e}");
        }
        result
    }

    /// Stop the server. Safe to call any number of times, from any thread.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Shutting down server...");
            self.shutdown.notify_one();
        }
        let closed = self.active_clients.close_all();
        if closed > 0 {
            debug!("Closed {closed} active connections");
        }
    }

    /// Stop the server when the process receives Ctrl+C.
    pub fn stop_on_ctrl_c(self: &Arc<Self>) {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                    server.stop();
                }
                Err(e) => error!("Error setting up Ctrl+C handler: {e}"),
            }
        });
    }

    async fn serve(&self) -> Result<(), Error> {
        let config = Arc::clone(&self.context.config);
        config.validate()?;

        let acceptor = config.tls.as_ref().map(build_tls_acceptor).transpose()?;
        let listener = TcpListener::bind(config.addr).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr);

        let scheme = if acceptor.is_some() { "https" } else { "http" };
        info!("Server listening on {scheme}://{addr}");
        self.log_endpoints().await;

        self.dispatcher.start()?;

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept(stream, peer, acceptor.as_ref(), config.connection_timeout()).await,
                    Err(e) => {
                        error!("Error accepting connection: {e}");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }

        drop(listener);
        // Connections accepted while the stop signal was in flight.
        self.active_clients.close_all();
        info!("Waiting for {} queued connections...", self.dispatcher.queued_tasks());
        self.dispatcher.stop().await;
        info!("Server shutdown complete");
        Ok(())
    }

    async fn log_endpoints(&self) {
        let router = self.router.read().await;
        info!("Registered endpoints:");
        for (method, pattern) in router.endpoints() {
            info!("  {method} {pattern}");
        }
    }

    async fn accept(&self, stream: TcpStream, peer: SocketAddr, acceptor: Option<&TlsAcceptor>, timeout: Duration) {
        let guard = self.active_clients.register(peer);
        debug!("Accepted connection from {peer}");

        let Some(acceptor) = acceptor else {
            self.dispatch(stream, guard);
            return;
        };

        let handshake = tokio::select! {
            result = tokio::time::timeout(timeout, acceptor.accept(stream)) => result,
            _ = guard.closed() => return,
        };
        match handshake {
            Ok(Ok(tls_stream)) => self.dispatch(tls_stream, guard),
            Ok(Err(e)) => warn!("TLS handshake with {peer} failed: {e}"),
            Err(_) => warn!("TLS handshake with {peer} timed out after {timeout:?}"),
        }
    }

    fn dispatch<S>(&self, stream: S, guard: ClientGuard)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let handler = self.connection_handler();
        let peer = guard.addr();
        let task = async move {
            tokio::select! {
                result = handler.handle_connection(stream, peer) => {
                    if let Err(e) = result {
                        debug!("Connection from {peer} ended with error: {e}");
                    }
                }
                _ = guard.closed() => debug!("Connection from {peer} closed by shutdown"),
            }
            drop(guard);
        };
        if let Err(e) = self.dispatcher.add_task(task) {
            warn!("Dropping connection from {peer}: {e}");
        }
    }
}

/// Serves one connection: read a request, answer it, close.
#[derive(Clone)]
pub struct ConnectionHandler {
    context: ServerContext,
    router: Arc<RwLock<Router>>,
    rate_limiter: Arc<RateLimiter>,
}

impl ConnectionHandler {
    /// Read one request from `stream`, write the response and shut the stream down.
    ///
    /// Returns an error when the request could not be read or parsed; an
    /// error response has already been sent where possible.
    pub async fn handle_connection<S>(&self, mut stream: S, peer: SocketAddr) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let config = &self.context.config;
        let timeout = config.connection_timeout();

        let bytes = match tokio::time::timeout(timeout, read_request(&mut stream, config)).await {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(Error::ParseError(ParserError::Incomplete))) => {
                return Err(ParserError::Incomplete.into());
            }
            Ok(Err(Error::ParseError(e))) => {
                warn!("Rejecting request from {peer}: {e}");
                self.respond(&mut stream, parse_error_response(&e), false).await?;
                return Err(e.into());
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!("Request from {peer} timed out after {timeout:?}");
                let response = HttpResponse::text(StatusCode::REQUEST_TIMEOUT, "Request timed out");
                self.respond(&mut stream, response, false).await?;
                return Err(Error::Timeout(timeout));
            }
        };

        let mut request = match parse_request(&bytes) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting request from {peer}: {e}");
                self.respond(&mut stream, parse_error_response(&e), false).await?;
                return Err(e.into());
            }
        };
        request.peer_addr = Some(peer);

        let method = request.method;
        let path = request.path.clone();
        let response = self.process(request).await;
        info!("{peer} {method} {path} {}", response.status().as_u16());

        self.respond(&mut stream, response, method == Method::HEAD).await
    }

    /// Produce the response for a parsed request.
    async fn process(&self, request: HttpRequest) -> HttpResponse {
        let config = &self.context.config;

        if !self.rate_limiter.allow_request(&client_id(&request)) {
            warn!("Rate limit exceeded for {}", client_id(&request));
            return HttpResponse::text(StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT_MESSAGE);
        }

        let vhost = request.host().and_then(|host| config.virtual_host(&host).cloned());
        let files = match &vhost {
            Some(vhost) => StaticFiles::new(&vhost.document_root, config.static_prefix.clone(), config.index_file.clone()),
            None => self.context.static_files(),
        };

        let response = match self.serve_static(&files, &request).await {
            Some(response) => response,
            None => self.route(request).await,
        };

        match &vhost {
            Some(vhost) => self.apply_error_page(vhost, response).await,
            None => response,
        }
    }

    /// Serve a file for GET or HEAD requests naming the index or a file under the static prefix.
    async fn serve_static(&self, files: &StaticFiles, request: &HttpRequest) -> Option<HttpResponse> {
        if !matches!(request.method, Method::GET | Method::HEAD) {
            return None;
        }

        let sanitized = files.sanitize(&request.path).await;
        let path = files.resolve(&sanitized).await?;
        match files.serve(&path, self.context.mime.as_ref()).await {
            Ok(response) => Some(response),
            Err(e) => {
                error!("Failed to read {}: {e}", path.display());
                Some(HttpResponse::text(StatusCode::INTERNAL_SERVER_ERROR, PANIC_MESSAGE))
            }
        }
    }

    /// Run the router in its own task so a panicking handler only fails this request.
    async fn route(&self, request: HttpRequest) -> HttpResponse {
        let router = Arc::clone(&self.router);
        let routed = tokio::spawn(async move { router.read().await.route_request(request).await }).await;
        match routed {
            Ok(response) => response,
            Err(e) => {
                error!("Request handler panicked: {e}");
                HttpResponse::text(StatusCode::INTERNAL_SERVER_ERROR, PANIC_MESSAGE)
            }
        }
    }

    async fn apply_error_page(&self, vhost: &VirtualHostConfig, mut response: HttpResponse) -> HttpResponse {
        let status = response.status();
        if !(status.is_client_error() || status.is_server_error()) {
            return response;
        }
        let Some(page) = vhost.error_page(status.as_u16()) else {
            return response;
        };
        match tokio::fs::read(&page).await {
            Ok(body) => {
                response.content_type = Some("text/html; charset=utf-8".to_string());
                response.body = body;
            }
            Err(e) => warn!("Error page {} unavailable: {e}", page.display()),
        }
        response
    }

    /// Stamp the fixed headers, write the response and close the stream.
    async fn respond<S>(&self, stream: &mut S, mut response: HttpResponse, head_only: bool) -> Result<(), Error>
    where
        S: AsyncWrite + Unpin,
    {
        response.set_header("Server", self.context.config.server_name.clone());
        response.set_header("Connection", "close");

        let bytes = if head_only { response.to_bytes_head() } else { response.to_bytes() };
        write_all(stream, &bytes).await?;

        if let Err(e) = stream.shutdown().await {
            if !is_disconnect(&e) {
                return Err(e.into());
            }
        }
        Ok(())
    }
}

fn client_id(request: &HttpRequest) -> String {
    request.peer_addr.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

/// Read until one complete request is buffered. `None` if the peer closed
/// the connection without sending anything.
async fn read_request<S>(stream: &mut S, config: &ServerConfig) -> Result<Option<Vec<u8>>, Error>
where
    S: AsyncRead + Unpin,
{
    let mut framer = RequestFramer::new(config.max_header_bytes, config.max_body_bytes);
    let mut buf = vec![0; config.read_buffer_size];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_disconnect(&e) => 0,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            return if framer.buffered().is_empty() {
                Ok(None)
            } else {
                Err(ParserError::Incomplete.into())
            };
        }
        if framer.push(&buf[..n])? == FrameStatus::Complete {
            return Ok(Some(framer.into_bytes()));
        }
    }
}

async fn write_all<S>(stream: &mut S, mut bytes: &[u8]) -> Result<(), Error>
where
    S: AsyncWrite + Unpin,
{
    while !bytes.is_empty() {
        match stream.write(bytes).await {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
            Ok(n) => bytes = &bytes[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_disconnect(&e) => {
                debug!("Peer went away while writing: {e}");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }

    match stream.flush().await {
        Err(e) if !is_disconnect(&e) => Err(e.into()),
        _ => Ok(()),
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}

/// The response for a request that could not be framed or parsed.
pub fn parse_error_response(e: &ParserError) -> HttpResponse {
    let status = match e {
        ParserError::HeadersTooLarge(_) => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
        ParserError::BodyTooLarge(..) => StatusCode::PAYLOAD_TOO_LARGE,
        ParserError::UnsupportedTransferEncoding(_) => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::BAD_REQUEST,
    };
    HttpResponse::text(status, format!("Error parsing request: {e}"))
}
