//! Connecting side: a [`Client`] opens one connection per request.

use std::time::Duration;

use http::Method;
use tokio::sync::mpsc;

use crate::out::{Outgoing, Role};
use crate::session::{Transport, OUT_CHANNEL_CAPACITY};
use crate::Result;

mod conn;
use conn::{ClientSession, Connect};

mod req;
pub use req::{ClientEvent, ClientRequest, RequestOptions};

/// Header count limit for responses unless configured. 0 means unlimited.
pub const DEFAULT_MAX_HEADERS_COUNT: usize = 1000;

/// Settings shared by requests.
///
/// Every request gets its own connection and asks for it to be closed
/// after the exchange.
#[derive(Debug, Clone)]
pub struct Client {
    timeout: Duration,
    max_headers: usize,
}

impl Default for Client {
    fn default() -> Self {
        Client {
            timeout: Duration::ZERO,
            max_headers: DEFAULT_MAX_HEADERS_COUNT,
        }
    }
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idle timeout of connections. Zero, the default, means none.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_headers_count(mut self, count: usize) -> Self {
        self.max_headers = count;
        self
    }

    /// Start a request. The connection is made in the background, the
    /// request can be written to straight away.
    pub fn request(&self, options: RequestOptions) -> Result<ClientRequest> {
        let connect = Connect::Tcp(options.host.clone(), options.port);
        self.start(connect, options)
    }

    /// A `GET` that is ended right away.
    pub async fn get(&self, options: RequestOptions) -> Result<ClientRequest> {
        let mut req = self.request(options.method(Method::GET))?;
        if let Err(e) = req.end("").await {
            // Surface the connect error, if any.
            return Err(match req.event().await {
                Err(cause) => cause,
                Ok(_) => e,
            });
        }
        Ok(req)
    }

    /// Start a request over an already established transport.
    pub fn request_over<T: Transport>(&self, io: T, options: RequestOptions) -> Result<ClientRequest> {
        self.start(Connect::Io(Box::new(io)), options)
    }

    fn start(&self, connect: Connect, options: RequestOptions) -> Result<ClientRequest> {
        let (out_tx, out_rx) = mpsc::channel(OUT_CHANNEL_CAPACITY);
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();

        let host = options.host_header();
        let RequestOptions {
            method,
            path,
            headers,
            timeout,
            ..
        } = options;

        let role = Role::Request {
            method: method.clone(),
            url: path,
        };
        let mut out = Outgoing::new(role, out_tx, ctl_tx);

        out.set_header("Host", host)?;
        out.set_header("Connection", "close")?;
        for (name, values) in headers {
            out.set_header(&name, values)?;
        }

        // A zero request timeout leaves the client's in place.
        let timeout = timeout.filter(|d| !d.is_zero()).unwrap_or(self.timeout);
        let session = ClientSession::new(method, self.max_headers, timeout, out_rx, ctl_rx, ev_tx);
        tokio::spawn(session.run(connect));

        Ok(ClientRequest::new(out, ev_rx))
    }
}

/// Start a request with a default [`Client`].
pub fn request(options: RequestOptions) -> Result<ClientRequest> {
    Client::new().request(options)
}

/// Start and end a `GET` with a default [`Client`].
pub async fn get(options: RequestOptions) -> Result<ClientRequest> {
    Client::new().get(options).await
}

#[cfg(test)]
mod test;
