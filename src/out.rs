use std::time::{Duration, SystemTime};

use bytes::{BufMut, Bytes, BytesMut};
use http::{Method, StatusCode, Version};
use tokio::sync::mpsc;

use crate::body::BodyWriter;
use crate::ext::{MethodExt, StatusExt};
use crate::header::{self, HeaderValues, Headers};
use crate::session::{Control, OutFrame};
use crate::util::LengthChecker;
use crate::{Error, Result};

/// Start line data of an outgoing message.
#[derive(Debug)]
pub(crate) enum Role {
    Request {
        method: Method,
        url: String,
    },
    Response {
        status: u16,
        reason: Option<String>,
        req_method: Method,
        req_version: Version,
        keep_alive: bool,
        send_date: bool,
        /// The request expects `100 Continue` and none was sent yet.
        owes_continue: bool,
    },
}

/// Shared machinery of [`ServerResponse`] and [`ClientRequest`].
///
/// The header block is committed at the first of `write_head`, `write` or
/// `end`. That is also when the body framing is decided.
///
/// [`ServerResponse`]: crate::ServerResponse
/// [`ClientRequest`]: crate::ClientRequest
#[derive(Debug)]
pub(crate) struct Outgoing {
    pub role: Role,
    headers: Headers,
    headers_sent: bool,
    finished: bool,
    writer: BodyWriter,
    trailers: Option<Headers>,
    close: bool,
    out: mpsc::Sender<OutFrame>,
    control: mpsc::UnboundedSender<Control>,
}

impl Outgoing {
    pub fn new(
        role: Role,
        out: mpsc::Sender<OutFrame>,
        control: mpsc::UnboundedSender<Control>,
    ) -> Self {
        Outgoing {
            role,
            headers: Headers::new(),
            headers_sent: false,
            finished: false,
            writer: BodyWriter::None,
            trailers: None,
            close: false,
            out,
            control,
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn get_header(&self, name: &str) -> Option<&HeaderValues> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: &str, values: impl Into<HeaderValues>) -> Result<()> {
        if self.headers_sent {
            return Err(Error::HeadersSent);
        }
        let values = values.into();
        header::validate(name, &values)?;
        self.headers.set(name, values);
        Ok(())
    }

    pub fn append_header(&mut self, name: &str, values: impl Into<HeaderValues>) -> Result<()> {
        if self.headers_sent {
            return Err(Error::HeadersSent);
        }
        let values = values.into();
        header::validate(name, &values)?;
        self.headers.append(name, values);
        Ok(())
    }

    pub fn remove_header(&mut self, name: &str) -> Result<()> {
        if self.headers_sent {
            return Err(Error::HeadersSent);
        }
        self.headers.remove(name);
        Ok(())
    }

    /// Set a header only if the application did not.
    pub fn default_header(&mut self, name: &str, value: impl Into<HeaderValues>) {
        if !self.headers.contains(name) {
            self.headers.set(name, value);
        }
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn set_timeout(&self, timeout: Duration) {
        let _ = self.control.send(Control::SetTimeout(timeout));
    }

    pub fn abort(&self) {
        let _ = self.control.send(Control::Abort);
    }

    pub fn add_trailers(&mut self, trailers: Headers) -> Result<()> {
        if self.finished {
            return Err(Error::BodyContentAfterFinish);
        }

        let announced = self
            .headers
            .get("trailer")
            .or_else(|| self.headers.get("trailers"));

        for (name, values) in trailers.iter() {
            let ok = announced
                .map(|a| a.tokens().any(|t| t.eq_ignore_ascii_case(name)))
                .unwrap_or(false);
            if !ok {
                return Err(Error::TrailerNotAnnounced(name.to_string()));
            }
            header::validate(name, values)?;
        }

        if self.headers_sent && !self.writer.is_chunked() {
            return Err(Error::TrailersRequireChunked);
        }

        let all = self.trailers.get_or_insert_with(Headers::new);
        for (name, values) in trailers {
            all.set(&name, values);
        }

        Ok(())
    }

    /// Send raw bytes ahead of the header block, i.e. an interim response.
    pub async fn send_interim(&mut self, bytes: &'static [u8]) -> Result<()> {
        if self.headers_sent {
            return Err(Error::HeadersSent);
        }
        self.send(OutFrame::Data(Bytes::from_static(bytes))).await
    }

    pub async fn write_head(&mut self) -> Result<()> {
        if self.headers_sent {
            return Err(Error::HeadersSent);
        }
        self.commit(None).await
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.finished {
            return Err(Error::BodyContentAfterFinish);
        }
        if !self.headers_sent {
            self.commit(None).await?;
        }
        let mut buf = BytesMut::new();
        self.writer.encode(data, &mut buf)?;
        if !buf.is_empty() {
            self.send(OutFrame::Data(buf.freeze())).await?;
        }
        Ok(())
    }

    pub async fn end(&mut self, data: &[u8]) -> Result<()> {
        if self.finished {
            return Err(Error::BodyContentAfterFinish);
        }
        if !self.headers_sent {
            self.commit(Some(data.len())).await?;
        }

        let mut buf = BytesMut::new();
        self.writer.encode(data, &mut buf)?;

        let intact = self.writer.finish(self.trailers.as_ref(), &mut buf);
        if !intact {
            debug!("Body framing incomplete, closing after message");
        }
        self.finished = true;

        if !buf.is_empty() {
            self.send(OutFrame::Data(buf.freeze())).await?;
        }
        let close = self.close || !intact;
        self.send(OutFrame::End { close }).await
    }

    async fn send(&self, frame: OutFrame) -> Result<()> {
        self.out
            .send(frame)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    fn is_bodyless(&self) -> bool {
        match &self.role {
            Role::Request { .. } => false,
            Role::Response {
                status, req_method, ..
            } => status.is_bodyless() || req_method == Method::HEAD,
        }
    }

    fn announces_trailers(&self) -> bool {
        self.headers.contains("trailer") || self.headers.contains("trailers")
    }

    fn framing(&mut self, ending: Option<usize>) -> Result<BodyWriter> {
        if self.is_bodyless() {
            return Ok(BodyWriter::None);
        }

        if self.headers.has_token("transfer-encoding", "chunked") {
            return Ok(BodyWriter::Chunked);
        }

        if let Some(v) = self.headers.get("content-length") {
            let len = v
                .first()
                .trim()
                .parse::<u64>()
                .map_err(|_| Error::BadContentLengthHeader)?;
            return Ok(BodyWriter::Sized(LengthChecker::new(len)));
        }

        if self.announces_trailers() {
            self.headers.set("Transfer-Encoding", "chunked");
            return Ok(BodyWriter::Chunked);
        }

        if let Some(len) = ending {
            if let Role::Request { method, .. } = &self.role {
                if len == 0 && !method.allow_request_body() {
                    return Ok(BodyWriter::None);
                }
            }
            self.headers.set("Content-Length", len);
            return Ok(BodyWriter::Sized(LengthChecker::new(len as u64)));
        }

        if let Role::Response { req_version, .. } = &self.role {
            if *req_version == Version::HTTP_10 {
                // No chunked for 1.0 clients, end of body is the close.
                self.headers.set("Connection", "close");
                return Ok(BodyWriter::CloseDelimited);
            }
        }

        self.headers.set("Transfer-Encoding", "chunked");
        Ok(BodyWriter::Chunked)
    }

    async fn commit(&mut self, ending: Option<usize>) -> Result<()> {
        self.writer = self.framing(ending)?;

        if self.trailers.is_some() && !self.writer.is_chunked() {
            warn!("Dropping trailers, body is not chunked");
            self.trailers = None;
        }

        let mut buf = BytesMut::with_capacity(256);

        match &self.role {
            Role::Request { method, url } => {
                buf.put_slice(format!("{} {} HTTP/1.1\r\n", method, url).as_bytes());
            }
            Role::Response {
                status,
                reason,
                req_version,
                keep_alive,
                send_date,
                owes_continue,
                ..
            } => {
                let reason = reason.as_deref().unwrap_or_else(|| {
                    StatusCode::from_u16(*status)
                        .ok()
                        .and_then(|s| s.canonical_reason())
                        .unwrap_or("")
                });
                buf.put_slice(format!("HTTP/1.1 {} {}\r\n", status, reason).as_bytes());

                let (keep_alive, send_date, owes_continue, http10) = (
                    *keep_alive,
                    *send_date,
                    *owes_continue,
                    *req_version == Version::HTTP_10,
                );

                if send_date {
                    self.default_header("Date", httpdate::fmt_http_date(SystemTime::now()));
                }
                if owes_continue {
                    // The client is holding back a body it was never asked for.
                    debug!("Final response without 100 Continue, closing after it");
                    self.headers.set("Connection", "close");
                } else if !keep_alive {
                    self.default_header("Connection", "close");
                } else if http10 {
                    self.default_header("Connection", "keep-alive");
                }
            }
        }

        if self.headers.has_token("connection", "close") {
            self.close = true;
        }

        self.headers.write_to(&mut buf);
        buf.put_slice(b"\r\n");

        let upgrade = self.headers.has_token("connection", "upgrade") && self.headers.contains("upgrade");

        trace!("Commit head, body {:?}", self.writer);
        self.headers_sent = true;

        self.send(OutFrame::Head {
            bytes: buf.freeze(),
            upgrade,
        })
        .await
    }
}
