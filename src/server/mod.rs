//! Accepting side: a [`Server`] owns sessions and dispatches parsed
//! requests to registered handlers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::incoming::IncomingMessage;
use crate::session::{shutdown_signal, BoxIo, ConnectionId, Transport};
use crate::upgrade::Upgraded;
use crate::{Error, Result};

mod conn;
use conn::ServerSession;

mod res;
pub use res::ServerResponse;

/// Idle timeout of new sessions unless configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(120_000);
/// Header count limit unless configured. 0 means unlimited.
pub const DEFAULT_MAX_HEADERS_COUNT: usize = 1000;

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// How [`Server::close_with`] treats live sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Finish in-flight exchanges, then close.
    Graceful,
    /// Abort every session at once.
    Immediate,
}

/// Answer of a timeout handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    Close,
    /// Leave the connection open. The timer re-arms on the next activity.
    KeepOpen,
}

/// The connection a timeout fired on.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: Option<SocketAddr>,
}

pub(crate) type RequestHandler =
    Arc<dyn Fn(IncomingMessage, ServerResponse) -> BoxFuture<'static, ()> + Send + Sync>;
pub(crate) type UpgradeHandler =
    Arc<dyn Fn(IncomingMessage, Upgraded, Bytes) -> BoxFuture<'static, ()> + Send + Sync>;
type TimeoutHandler = Arc<dyn Fn(&ConnectionInfo) -> TimeoutAction + Send + Sync>;
type ListeningHandler = Arc<dyn Fn(SocketAddr) + Send + Sync>;
type CloseHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default, Clone)]
pub(crate) struct Handlers {
    pub request: Option<RequestHandler>,
    pub check_continue: Option<RequestHandler>,
    pub connect: Option<UpgradeHandler>,
    pub upgrade: Option<UpgradeHandler>,
    pub timeout: Option<TimeoutHandler>,
    listening: Option<ListeningHandler>,
    close: Option<CloseHandler>,
}

fn request_handler<F, Fut>(f: F) -> RequestHandler
where
    F: Fn(IncomingMessage, ServerResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |req, res| f(req, res).boxed())
}

fn upgrade_handler<F, Fut>(f: F) -> UpgradeHandler
where
    F: Fn(IncomingMessage, Upgraded, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |req, io, head| f(req, io, head).boxed())
}

/// Registers handlers and settings for a [`Server`].
pub struct ServerBuilder {
    handlers: Handlers,
    max_headers: usize,
    timeout: Duration,
}

impl ServerBuilder {
    fn new() -> Self {
        ServerBuilder {
            handlers: Handlers::default(),
            max_headers: DEFAULT_MAX_HEADERS_COUNT,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Handler for every regular request. Without it requests get a 404.
    pub fn on_request<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(IncomingMessage, ServerResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers.request = Some(request_handler(f));
        self
    }

    /// Handler for requests with `Expect: 100-continue`, called instead of
    /// the request handler. Without it `100 Continue` is sent automatically.
    pub fn on_check_continue<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(IncomingMessage, ServerResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers.check_continue = Some(request_handler(f));
        self
    }

    /// Handler for `CONNECT`. Receives the transport and any bytes already
    /// read past the request head.
    pub fn on_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(IncomingMessage, Upgraded, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers.connect = Some(upgrade_handler(f));
        self
    }

    /// Handler for requests with `Connection: upgrade`. The handler writes
    /// the `101` response itself.
    pub fn on_upgrade<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(IncomingMessage, Upgraded, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers.upgrade = Some(upgrade_handler(f));
        self
    }

    pub fn on_timeout<F>(mut self, f: F) -> Self
    where
        F: Fn(&ConnectionInfo) -> TimeoutAction + Send + Sync + 'static,
    {
        self.handlers.timeout = Some(Arc::new(f));
        self
    }

    pub fn on_listening<F>(mut self, f: F) -> Self
    where
        F: Fn(SocketAddr) + Send + Sync + 'static,
    {
        self.handlers.listening = Some(Arc::new(f));
        self
    }

    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handlers.close = Some(Arc::new(f));
        self
    }

    pub fn max_headers_count(mut self, count: usize) -> Self {
        self.max_headers = count;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Server {
        let (shutdown, _) = watch::channel(None);
        let (sessions, _) = watch::channel(0);
        Server {
            inner: Arc::new(Inner {
                handlers: self.handlers,
                max_headers: AtomicUsize::new(self.max_headers),
                timeout_ms: AtomicU64::new(self.timeout.as_millis() as u64),
                shutdown,
                sessions,
                listening: Mutex::new(None),
            }),
        }
    }
}

struct Listening {
    addr: SocketAddr,
    accept: JoinHandle<()>,
}

pub(crate) struct Inner {
    pub handlers: Handlers,
    max_headers: AtomicUsize,
    timeout_ms: AtomicU64,
    shutdown: watch::Sender<Option<ShutdownMode>>,
    sessions: watch::Sender<usize>,
    listening: Mutex<Option<Listening>>,
}

impl Inner {
    pub fn max_headers(&self) -> usize {
        self.max_headers.load(Ordering::Relaxed)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<Option<ShutdownMode>> {
        self.shutdown.subscribe()
    }

    fn spawn_session(self: &Arc<Self>, io: BoxIo, peer: Option<SocketAddr>) -> JoinHandle<()> {
        self.sessions.send_modify(|n| *n += 1);
        let guard = SessionGuard(self.clone());
        let session = ServerSession::new(self.clone(), io, peer);
        tokio::spawn(async move {
            session.run().await;
            drop(guard);
        })
    }
}

/// Keeps the live session count.
struct SessionGuard(Arc<Inner>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.sessions.send_modify(|n| *n -= 1);
    }
}

/// An http/1.1 server.
///
/// Cloning gives another handle to the same server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn max_headers_count(&self) -> usize {
        self.inner.max_headers()
    }

    /// Applies to every header block parsed from now on, also on open
    /// connections. 0 means unlimited.
    pub fn set_max_headers_count(&self, count: usize) {
        self.inner.max_headers.store(count, Ordering::Relaxed);
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    /// Idle timeout for sessions created from now on. Zero disables it.
    pub fn set_timeout(&self, timeout: Duration) {
        self.inner
            .timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|l| l.addr)
    }

    /// Number of live sessions.
    pub fn connections(&self) -> usize {
        *self.inner.sessions.borrow()
    }

    /// Bind `addr` and start accepting. Returns the bound address.
    pub async fn listen(&self, addr: impl ToSocketAddrs) -> Result<SocketAddr> {
        if self.local_addr().is_some() {
            return Err(Error::AlreadyListening);
        }

        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        let accept = tokio::spawn(accept_loop(self.inner.clone(), listener));

        {
            let mut lock = self
                .inner
                .listening
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if lock.is_some() {
                accept.abort();
                return Err(Error::AlreadyListening);
            }
            *lock = Some(Listening { addr, accept });
        }

        info!("Listening on {}", addr);
        if let Some(h) = &self.inner.handlers.listening {
            h(addr);
        }

        Ok(addr)
    }

    /// Run a session over any transport.
    pub fn serve_connection<T: Transport>(&self, io: T, peer: Option<SocketAddr>) -> JoinHandle<()> {
        self.inner.spawn_session(Box::new(io), peer)
    }

    /// Stop accepting and wait for live sessions to finish their exchanges.
    pub async fn close(&self) {
        self.close_with(ShutdownMode::Graceful).await
    }

    pub async fn close_with(&self, mode: ShutdownMode) {
        debug!("Server close: {:?}", mode);
        self.inner.shutdown.send_replace(Some(mode));

        let listening = self
            .inner
            .listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(l) = listening {
            let _ = l.accept.await;
        }

        let mut sessions = self.inner.sessions.subscribe();
        let _ = sessions.wait_for(|n| *n == 0).await;

        if let Some(h) = &self.inner.handlers.close {
            h();
        }
    }
}

async fn accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    let mut shutdown = inner.shutdown_receiver();

    loop {
        tokio::select! {
            _ = shutdown_signal(Some(&mut shutdown)) => break,
            r = listener.accept() => match r {
                Ok((stream, peer)) => {
                    trace!("Accepted {}", peer);
                    let _ = stream.set_nodelay(true);
                    inner.spawn_session(Box::new(stream), Some(peer));
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    debug!("Accept loop stopped");
}

#[cfg(test)]
mod test;
