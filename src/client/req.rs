use std::time::Duration;

use bytes::Bytes;
use http::Method;
use tokio::sync::mpsc;

use crate::header::{HeaderValues, Headers};
use crate::incoming::IncomingMessage;
use crate::out::{Outgoing, Role};
use crate::upgrade::Upgraded;
use crate::{Error, Result, Transport};

use super::Client;

/// What to request, and where.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: Headers,
    pub(crate) timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        RequestOptions {
            host: host.into(),
            port,
            method: Method::GET,
            path: "/".into(),
            headers: Headers::new(),
            timeout: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Request target, query string included.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn header(mut self, name: &str, values: impl Into<HeaderValues>) -> Self {
        self.headers.append(name, values);
        self
    }

    /// Idle timeout for this request's connection. Overrides the client's
    /// unless zero.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Things that happen to a [`ClientRequest`], in the order they came
/// off the wire.
#[derive(Debug)]
pub enum ClientEvent {
    /// The server sent `100 Continue`.
    Continue,
    Response(IncomingMessage),
    /// The server agreed to switch protocols. Carries the `101` response,
    /// the transport and bytes already read past the response head.
    Upgrade(IncomingMessage, Upgraded, Bytes),
    /// The server accepted a `CONNECT`.
    Connect(IncomingMessage, Upgraded, Bytes),
    /// The connection was idle for the configured timeout. It stays open
    /// unless aborted.
    Timeout,
}

/// An outgoing request and the events of its connection.
///
/// Returned before the connection is established. Writes made before that
/// are queued.
#[derive(Debug)]
pub struct ClientRequest {
    out: Outgoing,
    events: mpsc::UnboundedReceiver<Result<ClientEvent>>,
}

impl ClientRequest {
    pub(crate) fn new(out: Outgoing, events: mpsc::UnboundedReceiver<Result<ClientEvent>>) -> Self {
        ClientRequest { out, events }
    }

    /// Send the request over an already established transport, with a
    /// default [`Client`].
    pub fn over<T: Transport>(io: T, options: RequestOptions) -> Result<ClientRequest> {
        Client::new().request_over(io, options)
    }

    pub fn method(&self) -> &Method {
        match &self.out.role {
            Role::Request { method, .. } => method,
            Role::Response { req_method, .. } => req_method,
        }
    }

    pub fn path(&self) -> &str {
        match &self.out.role {
            Role::Request { url, .. } => url,
            Role::Response { .. } => "",
        }
    }

    pub fn headers(&self) -> &Headers {
        self.out.headers()
    }

    pub fn get_header(&self, name: &str) -> Option<&HeaderValues> {
        self.out.get_header(name)
    }

    pub fn set_header(&mut self, name: &str, values: impl Into<HeaderValues>) -> Result<()> {
        self.out.set_header(name, values)
    }

    pub fn append_header(&mut self, name: &str, values: impl Into<HeaderValues>) -> Result<()> {
        self.out.append_header(name, values)
    }

    pub fn remove_header(&mut self, name: &str) -> Result<()> {
        self.out.remove_header(name)
    }

    pub fn headers_sent(&self) -> bool {
        self.out.headers_sent()
    }

    pub fn finished(&self) -> bool {
        self.out.finished()
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.out.set_timeout(timeout);
    }

    /// Commit the header block without any body, e.g. to wait for
    /// `100 Continue`.
    pub async fn write_head(&mut self) -> Result<()> {
        self.out.write_head().await
    }

    pub async fn write(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        self.out.write(data.as_ref()).await
    }

    pub async fn end(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        self.out.end(data.as_ref()).await
    }

    pub fn add_trailers(&mut self, trailers: Headers) -> Result<()> {
        self.out.add_trailers(trailers)
    }

    /// Close the connection. A response body in progress ends with an error.
    pub fn abort(&self) {
        self.out.abort();
    }

    /// Next event of the connection.
    pub async fn event(&mut self) -> Result<ClientEvent> {
        match self.events.recv().await {
            Some(r) => r,
            None => Err(Error::ConnectionClosed),
        }
    }

    /// Wait for the final response, passing over `100 Continue`.
    pub async fn response(&mut self) -> Result<IncomingMessage> {
        loop {
            match self.event().await? {
                ClientEvent::Continue => continue,
                ClientEvent::Response(res) => return Ok(res),
                ClientEvent::Upgrade(..) => return Err(Error::HandedOff("upgrade")),
                ClientEvent::Connect(..) => return Err(Error::HandedOff("connect")),
                ClientEvent::Timeout => return Err(Error::Timeout),
            }
        }
    }
}
