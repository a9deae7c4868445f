use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use http::{Method, Version};

use crate::ext::VersionExt;
use crate::header::{HeaderValues, Headers};
use crate::parser::{Head, StartLine};
use crate::stream::{BodyStream, BodyState, Chunk, FlowHandle};
use crate::Result;

/// A parsed request (server side) or response (client side) with its body.
///
/// The message is itself a [`Stream`] of body chunks.
#[derive(Debug)]
pub struct IncomingMessage {
    version: Version,
    start: StartLine,
    headers: Headers,
    peer: Option<SocketAddr>,
    body: BodyStream,
}

impl IncomingMessage {
    pub(crate) fn new(head: Head, peer: Option<SocketAddr>, body: BodyStream) -> Self {
        IncomingMessage {
            version: head.version,
            start: head.start,
            headers: head.headers,
            peer,
            body,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// `"1.0"` or `"1.1"`.
    pub fn http_version(&self) -> &'static str {
        self.version.as_str()
    }

    pub fn http_version_major(&self) -> u8 {
        self.version.major_minor().0
    }

    pub fn http_version_minor(&self) -> u8 {
        self.version.major_minor().1
    }

    pub fn start_line(&self) -> &StartLine {
        &self.start
    }

    /// Request method. `None` for responses.
    pub fn method(&self) -> Option<&Method> {
        match &self.start {
            StartLine::Request { method, .. } => Some(method),
            _ => None,
        }
    }

    /// Raw request target, query included. `None` for responses.
    pub fn url(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { url, .. } => Some(url),
            _ => None,
        }
    }

    /// Response status. `None` for requests.
    pub fn status_code(&self) -> Option<u16> {
        match &self.start {
            StartLine::Response { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn status_message(&self) -> Option<&str> {
        match &self.start {
            StartLine::Response { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValues> {
        self.headers.get(name)
    }

    /// Remote address, when the transport is a socket.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// See [`BodyStream::trailers`].
    pub fn trailers(&self) -> Option<&Headers> {
        self.body.trailers()
    }

    pub fn body(&self) -> &BodyStream {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut BodyStream {
        &mut self.body
    }

    pub fn into_body(self) -> BodyStream {
        self.body
    }

    pub fn state(&self) -> BodyState {
        self.body.state()
    }

    pub fn pause(&self) {
        self.body.pause()
    }

    pub fn resume(&self) {
        self.body.resume()
    }

    pub fn flow_handle(&self) -> FlowHandle {
        self.body.flow_handle()
    }

    pub fn set_encoding(&mut self, name: &str) -> Result<()> {
        self.body.set_encoding(name)
    }

    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        self.body.read_to_end().await
    }

    pub async fn read_to_string(&mut self) -> Result<String> {
        self.body.read_to_string().await
    }
}

impl Stream for IncomingMessage {
    type Item = Result<Chunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().body).poll_next(cx)
    }
}
