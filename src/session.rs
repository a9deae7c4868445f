//! Transport ownership shared by server and client sessions.
//!
//! A session is one task that owns the transport and all connection state.
//! Messages talk to it over channels, and [`Conn::activity`] waits for
//! whichever of those sources is ready next.

use std::collections::VecDeque;
use std::future::pending;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, OwnedPermit};
use tokio::sync::watch;
use tokio::time::{Instant, Sleep};

use crate::parser::MAX_HEAD_SIZE;
use crate::server::ShutdownMode;
use crate::stream::BodyFrame;
use crate::upgrade::Upgraded;
use crate::{Error, Result};

/// Capacity of the channel carrying body data to a [`BodyStream`].
///
/// [`BodyStream`]: crate::BodyStream
pub(crate) const BODY_CHANNEL_CAPACITY: usize = 8;
/// Capacity of the channel carrying encoded output to the session.
pub(crate) const OUT_CHANNEL_CAPACITY: usize = 8;
/// Decoded body bytes queued in the session before it stops reading.
pub(crate) const READ_WATERMARK: usize = 64 * 1024;
/// Encoded bytes queued for the transport before output is held back.
pub(crate) const WRITE_WATERMARK: usize = 64 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Anything a session can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub(crate) type BoxIo = Box<dyn Transport>;

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Encoded output from an outgoing message.
#[derive(Debug)]
pub(crate) enum OutFrame {
    /// The committed header block. `upgrade` if it asks for a protocol switch.
    Head { bytes: Bytes, upgrade: bool },
    Data(Bytes),
    /// Message complete. `close` if the connection can't be reused after it.
    End { close: bool },
}

#[derive(Debug)]
pub(crate) enum Control {
    SetTimeout(Duration),
    Abort,
}

/// The single idle timer of a connection.
///
/// A zero duration means none. An override, when set, wins over the base.
pub(crate) struct IdleTimer {
    base: Option<Duration>,
    over: Option<Duration>,
    sleep: Pin<Box<Sleep>>,
    armed: bool,
}

fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

impl IdleTimer {
    pub fn new(base: Duration) -> Self {
        let mut t = IdleTimer {
            base: non_zero(base),
            over: None,
            sleep: Box::pin(tokio::time::sleep(Duration::ZERO)),
            armed: false,
        };
        t.touch();
        t
    }

    pub fn current(&self) -> Option<Duration> {
        self.over.or(self.base)
    }

    /// Activity on the connection. Restarts the countdown.
    pub fn touch(&mut self) {
        match self.current() {
            Some(d) => {
                self.sleep.as_mut().reset(Instant::now() + d);
                self.armed = true;
            }
            None => self.armed = false,
        }
    }

    pub fn set_override(&mut self, d: Duration) {
        self.over = non_zero(d);
        self.touch();
    }

    pub fn clear_override(&mut self) {
        if self.over.take().is_some() {
            self.touch();
        }
    }

    /// Completes when the timer fires. A fired timer stays quiet until the
    /// next [`IdleTimer::touch`].
    async fn wait(&mut self) {
        if !self.armed {
            return pending().await;
        }
        self.sleep.as_mut().await;
        self.armed = false;
    }
}

/// Session side of a [`BodyStream`](crate::BodyStream).
///
/// Frames queue here until the bounded channel has room. Once the receiver
/// is gone the rest of the body is decoded and dropped.
pub(crate) struct BodySink {
    tx: Option<mpsc::Sender<BodyFrame>>,
    pending: VecDeque<BodyFrame>,
    pending_bytes: usize,
    ended: bool,
    discard: bool,
}

impl BodySink {
    pub fn new(tx: mpsc::Sender<BodyFrame>) -> Self {
        BodySink {
            tx: Some(tx),
            pending: VecDeque::new(),
            pending_bytes: 0,
            ended: false,
            discard: false,
        }
    }

    pub fn push(&mut self, frame: BodyFrame) {
        if self.ended {
            return;
        }
        if matches!(frame, BodyFrame::End(_) | BodyFrame::Abort(_)) {
            self.ended = true;
        }
        if self.discard {
            return;
        }
        self.pending_bytes += frame.len();
        self.pending.push_back(frame);
    }

    /// Sender to reserve a slot with, if there is anything to deliver.
    pub fn wants_slot(&self) -> Option<mpsc::Sender<BodyFrame>> {
        if self.pending.is_empty() {
            return None;
        }
        self.tx.clone()
    }

    pub fn deliver(&mut self, permit: Option<OwnedPermit<BodyFrame>>) {
        let Some(permit) = permit else {
            trace!("Body receiver gone, discarding");
            self.discard();
            return;
        };
        let Some(frame) = self.pending.pop_front() else {
            return;
        };
        self.pending_bytes -= frame.len();
        let last = !matches!(frame, BodyFrame::Data(_));
        permit.send(frame);
        if last {
            self.tx = None;
        }
    }

    /// Stop delivering, keep accepting.
    pub fn discard(&mut self) {
        self.discard = true;
        self.pending.clear();
        self.pending_bytes = 0;
        self.tx = None;
    }

    pub fn is_full(&self) -> bool {
        self.pending_bytes >= READ_WATERMARK
    }

    /// End seen and everything handed over (or dropped).
    pub fn is_done(&self) -> bool {
        self.ended && self.pending.is_empty()
    }

    /// End the body with an error, dropping undelivered data.
    pub fn abort(&mut self, err: Error) {
        if self.is_done() {
            return;
        }
        self.ended = true;
        self.pending.clear();
        self.pending_bytes = 0;
        if let Some(tx) = self.tx.take() {
            // A full channel leaves the receiver to see the channel close.
            let _ = tx.try_send(BodyFrame::Abort(err));
        }
    }
}

/// What [`Conn::activity`] waits on besides the transport itself.
#[derive(Default)]
pub(crate) struct Sources<'a> {
    pub read: bool,
    pub body: Option<mpsc::Sender<BodyFrame>>,
    pub out: Option<&'a mut mpsc::Receiver<OutFrame>>,
    pub control: Option<&'a mut mpsc::UnboundedReceiver<Control>>,
    pub shutdown: Option<&'a mut watch::Receiver<Option<ShutdownMode>>>,
}

pub(crate) enum Activity {
    Read(io::Result<usize>),
    Wrote(io::Result<usize>),
    /// A body channel slot, `None` if the receiver is gone.
    BodySlot(Option<OwnedPermit<BodyFrame>>),
    Out(Option<OutFrame>),
    Control(Option<Control>),
    Shutdown(ShutdownMode),
    Timeout,
}

pub(crate) struct Conn {
    pub id: ConnectionId,
    pub peer: Option<SocketAddr>,
    rd: ReadHalf<BoxIo>,
    wr: WriteHalf<BoxIo>,
    pub read_buf: BytesMut,
    pub write_buf: BytesMut,
    pub eof: bool,
    pub timer: IdleTimer,
}

impl Conn {
    pub fn new(io: BoxIo, peer: Option<SocketAddr>, timeout: Duration) -> Self {
        let (rd, wr) = tokio::io::split(io);
        Conn {
            id: ConnectionId::new(),
            peer,
            rd,
            wr,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
            eof: false,
            timer: IdleTimer::new(timeout),
        }
    }

    /// Room for more input. Beyond this a head is too large, or a body
    /// is not being consumed.
    pub fn can_read(&self) -> bool {
        !self.eof && self.read_buf.len() <= MAX_HEAD_SIZE
    }

    /// Whether more output may be pulled from messages.
    pub fn can_queue_output(&self) -> bool {
        self.write_buf.len() < WRITE_WATERMARK
    }

    pub async fn activity(&mut self, src: Sources<'_>) -> Activity {
        let Conn {
            rd,
            wr,
            read_buf,
            write_buf,
            timer,
            ..
        } = self;

        let read = src.read.then_some(rd);
        let write = (!write_buf.is_empty()).then_some(wr);

        tokio::select! {
            biased;
            r = write_some(write, &write_buf[..]) => Activity::Wrote(r),
            r = read_some(read, read_buf) => Activity::Read(r),
            p = reserve(src.body) => Activity::BodySlot(p),
            f = recv(src.out) => Activity::Out(f),
            c = recv_unbounded(src.control) => Activity::Control(c),
            m = shutdown_signal(src.shutdown) => Activity::Shutdown(m),
            _ = timer.wait() => Activity::Timeout,
        }
    }

    pub fn on_read(&mut self, r: io::Result<usize>) -> Result<()> {
        let n = r?;
        if n == 0 {
            trace!("{} read eof", self.id);
            self.eof = true;
        } else {
            self.timer.touch();
        }
        Ok(())
    }

    pub fn on_wrote(&mut self, r: io::Result<usize>) -> Result<()> {
        let n = r?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::WriteZero).into());
        }
        self.write_buf.advance(n);
        self.timer.touch();
        Ok(())
    }

    /// Write out everything queued.
    pub async fn flush(&mut self) -> Result<()> {
        self.wr.write_all(&self.write_buf).await?;
        self.write_buf.clear();
        self.wr.flush().await?;
        Ok(())
    }

    /// Flush what is queued and shut the transport down.
    pub async fn close(mut self) {
        let id = self.id;
        let limit = self.timer.current();
        let finish = async {
            self.flush().await?;
            self.wr.shutdown().await?;
            Ok::<_, Error>(())
        };
        let r = match limit {
            Some(d) => tokio::time::timeout(d, finish)
                .await
                .unwrap_or(Err(Error::Timeout)),
            None => finish.await,
        };
        if let Err(e) = r {
            debug!("{} close: {}", id, e);
        }
        trace!("{} closed", id);
    }

    /// Hand the transport out, together with input that was already read.
    pub async fn into_upgraded(mut self) -> Result<(Upgraded, Bytes)> {
        self.flush().await?;
        let head = self.read_buf.split().freeze();
        let io = self.rd.unsplit(self.wr);
        trace!("{} handed off with {} buffered", self.id, head.len());
        Ok((Upgraded::new(io, self.id, self.peer), head))
    }
}

async fn write_some(wr: Option<&mut WriteHalf<BoxIo>>, buf: &[u8]) -> io::Result<usize> {
    match wr {
        Some(wr) => wr.write(buf).await,
        None => pending().await,
    }
}

async fn read_some(rd: Option<&mut ReadHalf<BoxIo>>, buf: &mut BytesMut) -> io::Result<usize> {
    match rd {
        Some(rd) => {
            buf.reserve(READ_CHUNK);
            rd.read_buf(buf).await
        }
        None => pending().await,
    }
}

async fn reserve(tx: Option<mpsc::Sender<BodyFrame>>) -> Option<OwnedPermit<BodyFrame>> {
    match tx {
        Some(tx) => tx.reserve_owned().await.ok(),
        None => pending().await,
    }
}

async fn recv<T>(rx: Option<&mut mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn recv_unbounded<T>(rx: Option<&mut mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

pub(crate) async fn shutdown_signal(
    rx: Option<&mut watch::Receiver<Option<ShutdownMode>>>,
) -> ShutdownMode {
    let Some(rx) = rx else {
        return pending().await;
    };
    loop {
        if let Some(mode) = *rx.borrow_and_update() {
            return mode;
        }
        if rx.changed().await.is_err() {
            // Server dropped without closing.
            return pending().await;
        }
    }
}
