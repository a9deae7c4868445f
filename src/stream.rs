//! Readable side of a message body.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::task::AtomicWaker;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::encoding::{Encoding, TextDecoder};
use crate::header::Headers;
use crate::{Error, Result};

/// What a session hands to a [`BodyStream`].
#[derive(Debug)]
pub(crate) enum BodyFrame {
    Data(Bytes),
    End(Option<Headers>),
    Abort(Error),
}

impl BodyFrame {
    pub fn len(&self) -> usize {
        match self {
            BodyFrame::Data(b) => b.len(),
            _ => 0,
        }
    }
}

/// One delivered piece of a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Bytes(Bytes),
    /// Produced once an encoding is set.
    Text(String),
}

impl Chunk {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Chunk::Bytes(b) => b,
            Chunk::Text(s) => s.as_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    Open,
    Paused,
    /// All data delivered. Trailers are readable.
    Ended,
    /// Aborted before the end.
    Closed,
}

#[derive(Debug, Default)]
struct Flow {
    paused: AtomicBool,
    waker: AtomicWaker,
}

/// Pause and resume a [`BodyStream`] from elsewhere.
#[derive(Debug, Clone)]
pub struct FlowHandle(Arc<Flow>);

impl FlowHandle {
    pub fn pause(&self) {
        self.0.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.0.paused.store(false, Ordering::SeqCst);
        self.0.waker.wake();
    }

    pub fn is_paused(&self) -> bool {
        self.0.paused.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Done {
    Ended,
    Closed,
}

/// Flow controlled body of an incoming message.
///
/// Chunks arrive in transport order. While paused nothing is delivered and
/// data piles up in the session, which stops reading the transport once a
/// watermark is passed.
#[derive(Debug)]
pub struct BodyStream {
    rx: mpsc::Receiver<BodyFrame>,
    flow: FlowHandle,
    decoder: Option<TextDecoder>,
    trailers: Option<Headers>,
    done: Option<Done>,
}

impl BodyStream {
    pub(crate) fn new(rx: mpsc::Receiver<BodyFrame>) -> Self {
        BodyStream {
            rx,
            flow: FlowHandle(Arc::new(Flow::default())),
            decoder: None,
            trailers: None,
            done: None,
        }
    }

    /// A body that has already ended.
    pub(crate) fn empty() -> Self {
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(BodyFrame::End(None));
        BodyStream::new(rx)
    }

    pub fn state(&self) -> BodyState {
        match self.done {
            Some(Done::Ended) => BodyState::Ended,
            Some(Done::Closed) => BodyState::Closed,
            None if self.flow.is_paused() => BodyState::Paused,
            None => BodyState::Open,
        }
    }

    pub fn pause(&self) {
        self.flow.pause();
    }

    pub fn resume(&self) {
        self.flow.resume();
    }

    pub fn flow_handle(&self) -> FlowHandle {
        self.flow.clone()
    }

    /// Deliver [`Chunk::Text`] from now on.
    pub fn set_encoding(&mut self, name: &str) -> Result<()> {
        let encoding: Encoding = name.parse()?;
        self.decoder = Some(TextDecoder::new(encoding));
        Ok(())
    }

    /// Trailers sent after a chunked body. `None` until the body ended.
    pub fn trailers(&self) -> Option<&Headers> {
        if self.done == Some(Done::Ended) {
            self.trailers.as_ref()
        } else {
            None
        }
    }

    /// Collect the remaining body.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        self.resume();
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(chunk?.as_bytes());
        }
        Ok(buf.freeze())
    }

    /// Collect the remaining body as text, utf8 unless another encoding is set.
    pub async fn read_to_string(&mut self) -> Result<String> {
        if self.decoder.is_none() {
            self.decoder = Some(TextDecoder::new(Encoding::Utf8));
        }
        self.resume();
        let mut s = String::new();
        while let Some(chunk) = self.next().await {
            match chunk? {
                Chunk::Text(t) => s.push_str(&t),
                Chunk::Bytes(b) => s.push_str(&String::from_utf8_lossy(&b)),
            }
        }
        Ok(s)
    }

    fn chunk(&mut self, data: Bytes) -> Option<Chunk> {
        match &mut self.decoder {
            Some(d) => {
                let s = d.decode(&data);
                (!s.is_empty()).then_some(Chunk::Text(s))
            }
            None => Some(Chunk::Bytes(data)),
        }
    }
}

impl Stream for BodyStream {
    type Item = Result<Chunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.done.is_some() {
                return Poll::Ready(None);
            }

            if this.flow.is_paused() {
                this.flow.0.waker.register(cx.waker());
                // resume() might have raced the register.
                if this.flow.is_paused() {
                    return Poll::Pending;
                }
            }

            let frame = match this.rx.poll_recv(cx) {
                Poll::Ready(v) => v,
                Poll::Pending => return Poll::Pending,
            };

            match frame {
                Some(BodyFrame::Data(data)) => {
                    if let Some(chunk) = this.chunk(data) {
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                }
                Some(BodyFrame::End(trailers)) => {
                    trace!("Body stream ended");
                    this.trailers = trailers;
                    this.done = Some(Done::Ended);
                    let rest = this.decoder.as_mut().and_then(|d| d.finish());
                    return Poll::Ready(rest.map(|s| Ok(Chunk::Text(s))));
                }
                Some(BodyFrame::Abort(e)) => {
                    debug!("Body stream aborted: {}", e);
                    this.done = Some(Done::Closed);
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    this.done = Some(Done::Closed);
                    return Poll::Ready(Some(Err(Error::ConnectionClosed)));
                }
            }
        }
    }
}
