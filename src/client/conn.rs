use std::net::SocketAddr;
use std::time::Duration;

use bytes::Buf;
use http::Method;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::req::ClientEvent;
use crate::body::{BodyReader, Decoded};
use crate::ext::StatusExt;
use crate::incoming::IncomingMessage;
use crate::parser::{try_parse_response, Head};
use crate::session::{Activity, BodySink, BoxIo, Conn, Control, OutFrame, Sources};
use crate::session::BODY_CHANNEL_CAPACITY;
use crate::stream::{BodyFrame, BodyStream};
use crate::{Error, ErrorKind, Result};

/// Where the session gets its transport from.
pub(crate) enum Connect {
    Tcp(String, u16),
    Io(BoxIo),
}

/// The response being read.
struct Response {
    reader: BodyReader,
    sink: BodySink,
}

impl Response {
    fn feed(&mut self, conn: &mut Conn) -> Result<()> {
        while !self.sink.is_full() {
            match self.reader.decode(&mut conn.read_buf)? {
                Decoded::Data(data) => self.sink.push(BodyFrame::Data(data)),
                Decoded::End(trailers) => {
                    trace!("{} response body ended", conn.id);
                    self.sink.push(BodyFrame::End(trailers));
                    break;
                }
                Decoded::Pending => {
                    if conn.eof {
                        // Data already decoded is delivered ahead of the error.
                        match self.reader.on_eof() {
                            Ok(Decoded::End(trailers)) => self.sink.push(BodyFrame::End(trailers)),
                            Ok(_) => {}
                            Err(e) => self.sink.push(BodyFrame::Abort(e)),
                        }
                    }
                    break;
                }
            }
        }
        Ok(())
    }
}

enum End {
    Close,
    Abort(Error),
    Upgrade(IncomingMessage),
    Connect(IncomingMessage),
}

pub(crate) struct ClientSession {
    method: Method,
    max_headers: usize,
    timeout: Duration,
    out: Option<mpsc::Receiver<OutFrame>>,
    control: Option<mpsc::UnboundedReceiver<Control>>,
    events: mpsc::UnboundedSender<Result<ClientEvent>>,
    upgrade_requested: bool,
    request_done: bool,
    response: Option<Response>,
}

impl ClientSession {
    pub fn new(
        method: Method,
        max_headers: usize,
        timeout: Duration,
        out: mpsc::Receiver<OutFrame>,
        control: mpsc::UnboundedReceiver<Control>,
        events: mpsc::UnboundedSender<Result<ClientEvent>>,
    ) -> Self {
        ClientSession {
            method,
            max_headers,
            timeout,
            out: Some(out),
            control: Some(control),
            events,
            upgrade_requested: false,
            request_done: false,
            response: None,
        }
    }

    fn emit(&self, event: Result<ClientEvent>) {
        // Nobody listening is fine, the body stream may still be.
        let _ = self.events.send(event);
    }

    pub async fn run(mut self, connect: Connect) {
        let (io, peer) = match open(connect, self.timeout).await {
            Ok(v) => v,
            Err(e) => {
                debug!("Connect failed: {}", e);
                self.emit(Err(e));
                return;
            }
        };

        let mut conn = Conn::new(io, peer, self.timeout);
        debug!("{} open, peer {:?}", conn.id, peer);

        let end = self.drive(&mut conn).await;
        let id = conn.id;

        match end {
            End::Close => {
                if let Some(mut res) = self.response.take() {
                    res.sink.abort(Error::ConnectionClosed);
                }
                conn.close().await;
            }
            End::Abort(e) => {
                match e.kind() {
                    ErrorKind::Timeout | ErrorKind::Closed => debug!("{} aborted: {}", id, e),
                    _ => warn!("{} aborted: {}", id, e),
                }
                match self.response.take() {
                    Some(mut res) => res.sink.abort(e),
                    None => self.emit(Err(e)),
                }
            }
            End::Upgrade(res) => match conn.into_upgraded().await {
                Ok((io, head)) => self.emit(Ok(ClientEvent::Upgrade(res, io, head))),
                Err(e) => self.emit(Err(e)),
            },
            End::Connect(res) => match conn.into_upgraded().await {
                Ok((io, head)) => self.emit(Ok(ClientEvent::Connect(res, io, head))),
                Err(e) => self.emit(Err(e)),
            },
        }
    }

    async fn drive(&mut self, conn: &mut Conn) -> End {
        loop {
            if self.response.is_none() {
                match try_parse_response(&conn.read_buf, self.max_headers) {
                    Ok(Some((n, head))) => {
                        conn.read_buf.advance(n);
                        match self.on_head(conn, head) {
                            Ok(Some(end)) => return end,
                            Ok(None) => continue,
                            Err(e) => return End::Abort(e),
                        }
                    }
                    Ok(None) => {
                        if conn.eof {
                            return End::Abort(if conn.read_buf.is_empty() {
                                Error::ConnectionClosed
                            } else {
                                Error::IncompleteMessage
                            });
                        }
                    }
                    Err(e) => return End::Abort(e),
                }
            }

            if let Some(res) = &mut self.response {
                if let Err(e) = res.feed(conn) {
                    return End::Abort(e);
                }
                if res.sink.is_done() {
                    trace!("{} response done", conn.id);
                    return End::Close;
                }
            }

            let activity = {
                let body_full = self.response.as_ref().map(|r| r.sink.is_full()).unwrap_or(false);
                let can_queue = conn.can_queue_output();

                let src = Sources {
                    read: conn.can_read() && !body_full,
                    body: self.response.as_ref().and_then(|r| r.sink.wants_slot()),
                    out: self.out.as_mut().filter(|_| can_queue),
                    control: self.control.as_mut(),
                    shutdown: None,
                };

                conn.activity(src).await
            };

            if let Some(end) = self.handle(conn, activity) {
                return end;
            }
        }
    }

    fn on_head(&mut self, conn: &mut Conn, head: Head) -> Result<Option<End>> {
        let status = head.status().ok_or(Error::ResponseInvalidStatus)?;
        debug!("{} response {}", conn.id, status);
        conn.timer.touch();

        if status == 101 {
            if !self.upgrade_requested {
                return Err(Error::UnexpectedSwitchingProtocols);
            }
            let res = IncomingMessage::new(head, conn.peer, BodyStream::empty());
            return Ok(Some(End::Upgrade(res)));
        }

        if (100..200).contains(&status) {
            if status == 100 {
                self.emit(Ok(ClientEvent::Continue));
            } else {
                trace!("{} ignoring interim {}", conn.id, status);
            }
            return Ok(None);
        }

        if self.method == Method::CONNECT && status.is_success() {
            let res = IncomingMessage::new(head, conn.peer, BodyStream::empty());
            return Ok(Some(End::Connect(res)));
        }

        let reader = BodyReader::for_response(&self.method, &head, self.max_headers)?;
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);

        let res = IncomingMessage::new(head, conn.peer, BodyStream::new(body_rx));
        self.emit(Ok(ClientEvent::Response(res)));

        self.response = Some(Response {
            reader,
            sink: BodySink::new(body_tx),
        });

        Ok(None)
    }

    fn handle(&mut self, conn: &mut Conn, activity: Activity) -> Option<End> {
        match activity {
            Activity::Read(r) => {
                if let Err(e) = conn.on_read(r) {
                    return Some(End::Abort(e));
                }
            }
            Activity::Wrote(r) => {
                if let Err(e) = conn.on_wrote(r) {
                    return Some(End::Abort(e));
                }
            }
            Activity::BodySlot(permit) => {
                if let Some(res) = &mut self.response {
                    res.sink.deliver(permit);
                }
            }
            Activity::Out(frame) => return self.on_out(conn, frame),
            Activity::Control(c) => match c {
                Some(Control::SetTimeout(d)) => conn.timer.set_override(d),
                Some(Control::Abort) => return Some(End::Abort(Error::Aborted)),
                None => self.control = None,
            },
            // Clients are not part of a server shutdown.
            Activity::Shutdown(_) => {}
            Activity::Timeout => {
                debug!("{} idle timeout", conn.id);
                self.emit(Ok(ClientEvent::Timeout));
            }
        }
        None
    }

    fn on_out(&mut self, conn: &mut Conn, frame: Option<OutFrame>) -> Option<End> {
        match frame {
            Some(OutFrame::Head { bytes, upgrade }) => {
                self.upgrade_requested = upgrade;
                conn.write_buf.extend_from_slice(&bytes);
            }
            Some(OutFrame::Data(bytes)) => conn.write_buf.extend_from_slice(&bytes),
            Some(OutFrame::End { .. }) => {
                trace!("{} request ended", conn.id);
                self.request_done = true;
                self.out = None;
            }
            None => {
                self.out = None;
                if !self.request_done && self.response.is_none() {
                    // Request dropped unfinished.
                    return Some(End::Abort(Error::Aborted));
                }
            }
        }
        None
    }
}

async fn open(connect: Connect, timeout: Duration) -> Result<(BoxIo, Option<SocketAddr>)> {
    let (host, port) = match connect {
        Connect::Io(io) => return Ok((io, None)),
        Connect::Tcp(host, port) => (host, port),
    };

    trace!("Connecting to {}:{}", host, port);
    let dial = TcpStream::connect((host.as_str(), port));

    let stream = if timeout.is_zero() {
        dial.await?
    } else {
        tokio::time::timeout(timeout, dial)
            .await
            .map_err(|_| Error::Timeout)??
    };

    let _ = stream.set_nodelay(true);
    let peer = stream.peer_addr().ok();
    Ok((Box::new(stream), peer))
}
