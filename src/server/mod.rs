//! The server engine: an accept loop plus an optional worker pool driving
//! the per-connection HTTP lifecycle.

mod log;
mod pool;

pub use log::log_response;

use std::io;
use std::net::{TcpListener, ToSocketAddrs};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::codec::{Http1Parser, ParserFlags};
use crate::error::OperationStatus;
use crate::io::buffer::UNLIMITED;
use crate::io::{Connection, IPAddress, TlsConfig, TlsRole};
use crate::protocol::{Request, Response, Status, StatusCode};

use pool::ThreadPool;

/// How often the accept loop re-checks the running flag.
const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// A request handler plus the hooks around it.
///
/// Closures `Fn(&mut Request, Status) -> Response` are handlers, so the
/// common case needs no trait impl.
pub trait Handler: Send + Sync + 'static {
    /// Builds the response for a parsed request. `status` is the suggested
    /// status computed by the parser; a well-behaved handler answers errors
    /// (`400`, `411`, ...) with that status.
    fn respond(&self, request: &mut Request, status: Status) -> Response;

    /// Runs once per connection before any byte is read; returning an error
    /// drops the connection.
    fn accept(&self, _connection: &Connection) -> OperationStatus {
        OperationStatus::ok()
    }

    /// Called for errors outside `respond`: transport failures, handshake
    /// failures, sends that broke midway.
    fn error(&self, connection: &Connection, what: &OperationStatus) {
        error!(remote = %connection.remote_address(), cause = %what, "server error");
    }
}

impl<F> Handler for F
where
    F: Fn(&mut Request, Status) -> Response + Send + Sync + 'static,
{
    fn respond(&self, request: &mut Request, status: Status) -> Response {
        self(request, status)
    }
}

struct ServerCore<H: Handler> {
    handler: H,
    timeout: Mutex<Option<Duration>>,
    max_request_size: AtomicU64,
    max_response_size: AtomicU64,
    flags: Mutex<ParserFlags>,
    tls: Mutex<Option<Arc<TlsConfig>>>,
}

/// A blocking HTTP/1.x server.
///
/// `start()` runs the accept loop in a background thread, `run()` in the
/// caller's thread. Without a pool every connection is processed on the
/// accept thread; with one, connections are queued and drained by workers.
/// Connections are one-shot: the response carries `Connection: close` and
/// the socket is closed after it.
pub struct Server<H: Handler> {
    core: Arc<ServerCore<H>>,
    listen: Mutex<IPAddress>,
    running: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    pool: Option<Arc<ThreadPool>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<H: Handler> Server<H> {
    pub fn new(listen: impl Into<IPAddress>, handler: H) -> Self {
        Self {
            core: Arc::new(ServerCore {
                handler,
                timeout: Mutex::new(None),
                max_request_size: AtomicU64::new(UNLIMITED),
                max_response_size: AtomicU64::new(UNLIMITED),
                flags: Mutex::new(ParserFlags::default()),
                tls: Mutex::new(None),
            }),
            listen: Mutex::new(listen.into()),
            running: Arc::new(AtomicBool::new(false)),
            accept_thread: Mutex::new(None),
            pool: None,
        }
    }

    /// Adds a worker pool of `pool_size` threads (must be positive).
    pub fn with_pool(mut self, pool_size: usize) -> Self {
        let core = Arc::clone(&self.core);
        self.pool = Some(Arc::new(ThreadPool::new(
            pool_size,
            Arc::new(move |worker, connection| core.process(worker, connection)),
        )));
        self
    }

    /// Serves TLS with the given certificate configuration.
    pub fn with_tls(self, config: TlsConfig) -> Self {
        *lock(&self.core.tls) = Some(Arc::new(config));
        self
    }

    pub fn listen_address(&self) -> IPAddress {
        lock(&self.listen).clone()
    }

    /// Changes the listening address. Illegal once the server is running.
    pub fn set_listen_address(&self, listen: impl Into<IPAddress>) {
        assert!(!self.running(), "cannot change the listen address while running");
        *lock(&self.listen) = listen.into();
    }

    /// Network timeout applied to every connection.
    pub fn set_timeout(&self, timeout: Duration) {
        *lock(&self.core.timeout) = Some(timeout);
    }

    pub fn clear_timeout(&self) {
        *lock(&self.core.timeout) = None;
    }

    pub fn timeout(&self) -> Option<Duration> {
        *lock(&self.core.timeout)
    }

    /// Upper bound on header-plus-body size; oversized requests are answered
    /// with `400` (header section) or `413` (payload).
    pub fn set_max_request_size(&self, size: u64) {
        self.core.max_request_size.store(size, Ordering::Relaxed);
    }

    /// Removes the request size limit (the default).
    pub fn set_unlimited_request_size(&self) {
        self.set_max_request_size(UNLIMITED);
    }

    pub fn max_request_size(&self) -> u64 {
        self.core.max_request_size.load(Ordering::Relaxed)
    }

    /// Upper bound on the size of responses this server will write; larger
    /// ones are replaced with `500` and reported through the error hook.
    pub fn set_max_response_size(&self, size: u64) {
        self.core.max_response_size.store(size, Ordering::Relaxed);
    }

    pub fn set_unlimited_response_size(&self) {
        self.set_max_response_size(UNLIMITED);
    }

    pub fn max_response_size(&self) -> u64 {
        self.core.max_response_size.load(Ordering::Relaxed)
    }

    /// Writes one access-log line for a handled request; see
    /// [`log_response`] for the placeholder set.
    pub fn log_response(
        &self,
        format: &str,
        worker: usize,
        request: &Request,
        response: &Response,
        output: &mut dyn io::Write,
    ) -> io::Result<()> {
        log_response(format, worker, request, response, output)
    }

    pub fn set_parser_flags(&self, flags: ParserFlags) {
        *lock(&self.core.flags) = flags;
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn pool_size(&self) -> Option<usize> {
        self.pool.as_ref().map(|pool| pool.pool_size())
    }

    /// Blocks until every queued connection has finished and all workers
    /// joined. Illegal from inside a pooled thread.
    pub fn wait(&self) {
        let pool = self.pool.as_ref().expect("server has no thread pool");
        pool.wait();
    }

    /// Resizes the worker pool (size must stay positive). Illegal from
    /// inside a pooled thread.
    pub fn resize_pool(&self, pool_size: usize) {
        let pool = self.pool.as_ref().expect("server has no thread pool");
        pool.resize_pool(pool_size);
    }

    fn bind(&self) -> Result<TcpListener, OperationStatus> {
        let listen = self.listen_address();
        let listener = match listen.socket_addr() {
            Some(addr) => TcpListener::bind(addr),
            None => (listen.host.as_str(), listen.port)
                .to_socket_addrs()
                .and_then(|mut addrs| {
                    addrs.next().ok_or_else(|| {
                        io::Error::new(io::ErrorKind::NotFound, "listen address did not resolve")
                    })
                })
                .and_then(TcpListener::bind),
        };
        let listener = listener.map_err(|e| {
            error!(cause = %e, listen = %listen, "bind server error");
            OperationStatus::error(format!("cannot bind {listen}: {e}"))
        })?;

        if let Ok(addr) = listener.local_addr() {
            *lock(&self.listen) = addr.into();
        }
        Ok(listener)
    }

    /// Starts the accept loop in a background thread. Fails if the address
    /// cannot be bound or the server is already running.
    pub fn start(&self) -> Result<(), OperationStatus> {
        if self.running() {
            return Err(OperationStatus::error("server already running"));
        }
        let listener = self.bind()?;
        self.running.store(true, Ordering::Release);

        let core = Arc::clone(&self.core);
        let running = Arc::clone(&self.running);
        let pool = self.pool.clone();
        let handle = thread::spawn(move || accept_loop(listener, core, running, pool));
        *lock(&self.accept_thread) = Some(handle);
        Ok(())
    }

    /// Runs the accept loop in the caller's thread until `stop()`.
    pub fn run(&self) -> Result<(), OperationStatus> {
        if self.running() {
            return Err(OperationStatus::error("server already running"));
        }
        let listener = self.bind()?;
        self.running.store(true, Ordering::Release);
        accept_loop(listener, Arc::clone(&self.core), Arc::clone(&self.running), self.pool.clone());
        Ok(())
    }

    /// Stops accepting, then lets each worker finish its current connection
    /// before joining.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = lock(&self.accept_thread).take() {
            let _ = handle.join();
        }
        if let Some(pool) = &self.pool {
            pool.wait();
        }
    }
}

impl<H: Handler> Drop for Server<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop<H: Handler>(
    listener: TcpListener,
    core: Arc<ServerCore<H>>,
    running: Arc<AtomicBool>,
    pool: Option<Arc<ThreadPool>>,
) {
    // nonblocking accept so the loop can observe stop()
    if let Err(e) = listener.set_nonblocking(true) {
        error!(cause = %e, "cannot configure listener");
        running.store(false, Ordering::Release);
        return;
    }

    while running.load(Ordering::Acquire) {
        let (stream, remote) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        };

        debug!(remote = %remote, "accepted connection");
        if let Err(e) = stream.set_nonblocking(false) {
            warn!(cause = %e, "cannot configure accepted socket");
            continue;
        }

        let connection = if lock(&core.tls).is_some() {
            Connection::tls_from_tcp(stream)
        } else {
            Connection::from_tcp(stream)
        };

        match &pool {
            Some(pool) => pool.enqueue(connection),
            None => core.process(0, connection),
        }
    }
}

impl<H: Handler> ServerCore<H> {
    /// The per-connection lifecycle: deadline, handshake, accept hook,
    /// parse, respond, send, close.
    fn process(&self, worker: usize, connection: Connection) {
        debug!(worker, remote = %connection.remote_address(), "processing connection");
        match *lock(&self.timeout) {
            Some(timeout) => connection.set_timeout(timeout),
            None => connection.clear_timeout(),
        }

        let tls = lock(&self.tls).clone();
        if let Some(tls) = tls {
            let status = connection.handshake(TlsRole::Server, &tls, "");
            if status.is_error() {
                self.handler.error(&connection, &status);
                connection.close(false);
                return;
            }
        }

        let status = self.handler.accept(&connection);
        if status.is_error() {
            self.handler.error(&connection, &status);
            connection.close(false);
            return;
        }

        let parser = Http1Parser::with_flags(*lock(&self.flags));
        let max_request_size = self.max_request_size.load(Ordering::Relaxed);
        let (mut request, mut suggested) =
            match connection.read_request(&parser, max_request_size) {
                Ok(parsed) => parsed,
                Err(status) => {
                    self.handler.error(&connection, &status);
                    connection.close(false);
                    return;
                }
            };

        if suggested == StatusCode::Continue {
            // hand the interim decision to the handler, then re-enter with
            // the body readable
            let interim = self.invoke(&mut request, suggested.clone());
            if interim.status == StatusCode::Continue {
                let status = connection.send_continue(&request.protocol);
                if status.is_error() {
                    self.handler.error(&connection, &status);
                    connection.close(false);
                    return;
                }
                suggested = Status::ok();
            } else {
                self.finish(&connection, &request, interim);
                return;
            }
        }

        let response = self.invoke(&mut request, suggested);
        if request.connection.is_none() {
            // the handler moved the connection into a detached path
            return;
        }
        self.finish(&connection, &request, response);
    }

    /// Calls the handler, converting panics into `500`.
    fn invoke(&self, request: &mut Request, status: Status) -> Response {
        let protocol = request.protocol.clone();
        catch_unwind(AssertUnwindSafe(|| self.handler.respond(request, status)))
            .unwrap_or_else(|_| {
                error!("handler panicked; answering 500");
                Response::from_status(StatusCode::InternalServerError, protocol)
            })
    }

    fn finish(&self, connection: &Connection, request: &Request, mut response: Response) {
        let max_response_size = self.max_response_size.load(Ordering::Relaxed);
        if matches!(response.body.content_length(), Some(size) if size > max_response_size) {
            let status = OperationStatus::error("response exceeds the maximum response size");
            self.handler.error(connection, &status);
            response = Response::from_status(StatusCode::InternalServerError, response.protocol);
        }

        if request.protocol.valid() {
            response.protocol = request.protocol.clone();
        }
        // connections are one-shot
        response.headers.set("Connection", "close");
        response.clean_body(request);

        let status = connection.send_response(&mut response);
        if status.is_error() {
            self.handler.error(connection, &status);
        }
        connection.close(true);
    }
}
