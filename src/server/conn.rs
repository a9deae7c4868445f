use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Buf;
use http::{Method, Version};
use tokio::sync::{mpsc, watch};

use super::{ConnectionInfo, Inner, ServerResponse, ShutdownMode, TimeoutAction, UpgradeHandler};
use crate::body::{BodyReader, Decoded};
use crate::incoming::IncomingMessage;
use crate::parser::{try_parse_request, Head, StartLine};
use crate::session::{Activity, BodySink, BoxIo, Conn, Control, OutFrame, Sources};
use crate::session::{BODY_CHANNEL_CAPACITY, OUT_CHANNEL_CAPACITY};
use crate::stream::{BodyFrame, BodyStream};
use crate::{Error, ErrorKind, Result};

const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";
const HEADERS_TOO_LARGE: &[u8] =
    b"HTTP/1.1 431 Request Header Fields Too Large\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";
const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// One request/response exchange in progress.
struct Exchange {
    reader: BodyReader,
    sink: BodySink,
    out: Option<mpsc::Receiver<OutFrame>>,
    control: Option<mpsc::UnboundedReceiver<Control>>,
    keep_alive: bool,
    response_done: bool,
    /// `100 Continue` is up to the handler and has not been sent.
    awaiting_continue: bool,
    head_sent: bool,
    body_started: bool,
}

impl Exchange {
    /// Move request body from the read buffer to the body stream.
    fn feed(&mut self, conn: &mut Conn) -> Result<()> {
        while !self.sink.is_full() {
            match self.reader.decode(&mut conn.read_buf)? {
                Decoded::Data(data) => {
                    self.body_started = true;
                    self.sink.push(BodyFrame::Data(data));
                }
                Decoded::End(trailers) => {
                    trace!("{} request body ended", conn.id);
                    self.sink.push(BodyFrame::End(trailers));
                    break;
                }
                Decoded::Pending => {
                    if conn.eof {
                        if let Decoded::End(trailers) = self.reader.on_eof()? {
                            self.sink.push(BodyFrame::End(trailers));
                        }
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.response_done && self.reader.is_ended() && self.sink.is_done()
    }
}

/// How a session ends.
enum End {
    /// Flush and close.
    Close,
    /// Drop the transport right away.
    Abort(Error),
    /// Hand the transport to a connect or upgrade handler.
    Handoff(IncomingMessage, UpgradeHandler),
}

pub(crate) struct ServerSession {
    inner: Arc<Inner>,
    conn: Conn,
    shutdown: watch::Receiver<Option<ShutdownMode>>,
    draining: bool,
    exchange: Option<Exchange>,
}

impl ServerSession {
    pub fn new(inner: Arc<Inner>, io: BoxIo, peer: Option<SocketAddr>) -> Self {
        let conn = Conn::new(io, peer, inner.timeout());
        let shutdown = inner.shutdown_receiver();
        ServerSession {
            inner,
            conn,
            shutdown,
            draining: false,
            exchange: None,
        }
    }

    pub async fn run(mut self) {
        let id = self.conn.id;
        debug!("{} open, peer {:?}", id, self.conn.peer);

        let end = self.drive().await;

        let ServerSession { conn, exchange, .. } = self;

        match end {
            End::Close => {
                if let Some(mut ex) = exchange {
                    ex.sink.abort(Error::ConnectionClosed);
                }
                conn.close().await;
            }
            End::Abort(e) => {
                match e.kind() {
                    ErrorKind::Timeout | ErrorKind::Closed => debug!("{} aborted: {}", id, e),
                    _ => warn!("{} aborted: {}", id, e),
                }
                if let Some(mut ex) = exchange {
                    ex.sink.abort(e);
                }
            }
            End::Handoff(req, handler) => match conn.into_upgraded().await {
                Ok((io, head)) => {
                    debug!("{} handed off", id);
                    tokio::spawn(handler(req, io, head));
                }
                Err(e) => warn!("{} handoff failed: {}", id, e),
            },
        }
    }

    async fn drive(&mut self) -> End {
        loop {
            if self.exchange.is_none() {
                if self.draining {
                    return End::Close;
                }

                match self.next_request() {
                    Ok(Some(end)) => return end,
                    Ok(None) => {}
                    Err(e) => return self.reject(e),
                }

                if self.exchange.is_none() && self.conn.eof {
                    if !self.conn.read_buf.is_empty() {
                        debug!("{} eof in request head", self.conn.id);
                    }
                    return End::Close;
                }
            }

            if let Some(ex) = &mut self.exchange {
                if let Err(e) = ex.feed(&mut self.conn) {
                    return End::Abort(e);
                }

                if ex.is_done() {
                    let keep_alive = ex.keep_alive;
                    trace!("{} exchange done, keep-alive: {}", self.conn.id, keep_alive);
                    self.exchange = None;
                    self.conn.timer.clear_override();
                    if !keep_alive || self.draining {
                        return End::Close;
                    }
                    continue;
                }
            }

            let activity = {
                let ServerSession {
                    conn,
                    exchange,
                    shutdown,
                    draining,
                    ..
                } = self;

                let body_full = exchange.as_ref().map(|e| e.sink.is_full()).unwrap_or(false);
                let can_queue = conn.can_queue_output();

                let mut src = Sources {
                    read: conn.can_read() && !body_full,
                    shutdown: (!*draining).then_some(shutdown),
                    ..Default::default()
                };

                if let Some(ex) = exchange {
                    src.body = ex.sink.wants_slot();
                    src.out = ex.out.as_mut().filter(|_| can_queue);
                    src.control = ex.control.as_mut();
                }

                conn.activity(src).await
            };

            if let Some(end) = self.handle(activity) {
                return end;
            }
        }
    }

    fn next_request(&mut self) -> Result<Option<End>> {
        let max_headers = self.inner.max_headers();

        let Some((n, head)) = try_parse_request(&self.conn.read_buf, max_headers)? else {
            return Ok(None);
        };
        self.conn.read_buf.advance(n);
        self.conn.timer.touch();

        self.dispatch(head)
    }

    fn dispatch(&mut self, head: Head) -> Result<Option<End>> {
        let StartLine::Request { method, url } = &head.start else {
            return Err(Error::RequestInvalidMethod);
        };
        let method = method.clone();
        debug!("{} {} {}", self.conn.id, method, url);

        let handlers = &self.inner.handlers;

        let is_connect = method == Method::CONNECT;
        let is_upgrade =
            head.headers.has_token("connection", "upgrade") && head.headers.contains("upgrade");

        if is_connect || is_upgrade {
            let (kind, handler) = if is_connect {
                ("connect", handlers.connect.clone())
            } else {
                ("upgrade", handlers.upgrade.clone())
            };
            let handler = handler.ok_or(Error::UpgradeContractViolation(kind))?;
            let req = IncomingMessage::new(head, self.conn.peer, BodyStream::empty());
            return Ok(Some(End::Handoff(req, handler)));
        }

        let reader = BodyReader::for_request(&head, self.inner.max_headers())?;

        let keep_alive = if head.version == Version::HTTP_10 {
            head.headers.has_token("connection", "keep-alive")
        } else {
            !head.headers.has_token("connection", "close")
        };
        let expect_continue =
            head.version == Version::HTTP_11 && head.headers.has_token("expect", "100-continue");

        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel(OUT_CHANNEL_CAPACITY);
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();

        let awaiting_continue = expect_continue && handlers.check_continue.is_some();

        let res = ServerResponse::new(
            method,
            head.version,
            keep_alive,
            awaiting_continue,
            out_tx,
            ctl_tx,
        );
        let req = IncomingMessage::new(head, self.conn.peer, BodyStream::new(body_rx));

        self.exchange = Some(Exchange {
            reader,
            sink: BodySink::new(body_tx),
            out: Some(out_rx),
            control: Some(ctl_rx),
            keep_alive,
            response_done: false,
            awaiting_continue,
            head_sent: false,
            body_started: false,
        });

        if expect_continue {
            if let Some(h) = &handlers.check_continue {
                tokio::spawn(h(req, res));
                return Ok(None);
            }
            trace!("{} automatic 100 Continue", self.conn.id);
            self.conn.write_buf.extend_from_slice(CONTINUE);
        }

        match &handlers.request {
            Some(h) => tokio::spawn(h(req, res)),
            None => tokio::spawn(not_found(req, res)),
        };

        Ok(None)
    }

    /// Answer a request that can't be served and close.
    fn reject(&mut self, e: Error) -> End {
        warn!("{} bad request: {}", self.conn.id, e);
        let response = match e {
            Error::HeaderCountExceeded(_) | Error::HeadTooLarge(_) => HEADERS_TOO_LARGE,
            Error::UpgradeContractViolation(_) => return End::Close,
            _ => BAD_REQUEST,
        };
        self.conn.write_buf.extend_from_slice(response);
        End::Close
    }

    fn handle(&mut self, activity: Activity) -> Option<End> {
        match activity {
            Activity::Read(r) => {
                if let Err(e) = self.conn.on_read(r) {
                    return Some(End::Abort(e));
                }
            }
            Activity::Wrote(r) => {
                if let Err(e) = self.conn.on_wrote(r) {
                    return Some(End::Abort(e));
                }
            }
            Activity::BodySlot(permit) => {
                if let Some(ex) = &mut self.exchange {
                    ex.sink.deliver(permit);
                }
            }
            Activity::Out(frame) => return self.on_out(frame),
            Activity::Control(c) => match c {
                Some(Control::SetTimeout(d)) => self.conn.timer.set_override(d),
                Some(Control::Abort) => return Some(End::Abort(Error::Aborted)),
                None => {
                    if let Some(ex) = &mut self.exchange {
                        ex.control = None;
                    }
                }
            },
            Activity::Shutdown(ShutdownMode::Graceful) => {
                debug!("{} draining", self.conn.id);
                self.draining = true;
                if self.exchange.is_none() {
                    return Some(End::Close);
                }
            }
            Activity::Shutdown(ShutdownMode::Immediate) => {
                return Some(End::Abort(Error::ConnectionClosed));
            }
            Activity::Timeout => return self.on_timeout(),
        }
        None
    }

    fn on_out(&mut self, frame: Option<OutFrame>) -> Option<End> {
        let ex = self.exchange.as_mut()?;

        match frame {
            Some(OutFrame::Head { bytes, .. }) => {
                ex.head_sent = true;
                self.conn.write_buf.extend_from_slice(&bytes);
            }
            Some(OutFrame::Data(bytes)) => {
                if !ex.head_sent {
                    // Only an interim response goes ahead of the head.
                    ex.awaiting_continue = false;
                }
                self.conn.write_buf.extend_from_slice(&bytes);
            }
            Some(OutFrame::End { close }) => {
                trace!("{} response ended", self.conn.id);
                ex.response_done = true;
                ex.keep_alive &= !close;
                ex.out = None;
                if !ex.reader.is_ended() {
                    if ex.awaiting_continue && !ex.body_started {
                        // The body was refused and will not come.
                        debug!("{} request body refused, closing", self.conn.id);
                        return Some(End::Close);
                    }
                    // Unread request body is drained and dropped.
                    ex.sink.discard();
                }
            }
            None => {
                if !ex.response_done {
                    return Some(End::Abort(Error::Aborted));
                }
                ex.out = None;
            }
        }
        None
    }

    fn on_timeout(&mut self) -> Option<End> {
        let info = ConnectionInfo {
            id: self.conn.id,
            peer: self.conn.peer,
        };

        let action = match &self.inner.handlers.timeout {
            Some(h) => h(&info),
            None => TimeoutAction::Close,
        };
        debug!("{} idle timeout: {:?}", info.id, action);

        match action {
            TimeoutAction::Close => Some(End::Abort(Error::Timeout)),
            TimeoutAction::KeepOpen => None,
        }
    }
}

async fn not_found(_req: IncomingMessage, mut res: ServerResponse) {
    let r = async {
        res.set_status(404)?;
        res.end("").await
    };
    if let Err(e) = r.await {
        debug!("404 response failed: {}", e);
    }
}
