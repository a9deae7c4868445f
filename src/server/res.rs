use std::time::Duration;

use http::{Method, Version};
use tokio::sync::mpsc;

use crate::header::{HeaderValues, Headers};
use crate::out::{Outgoing, Role};
use crate::session::{Control, OutFrame};
use crate::{Error, Result};

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Response to a request, handed to the server handlers.
///
/// Dropping it before [`ServerResponse::end`] aborts the connection.
#[derive(Debug)]
pub struct ServerResponse {
    out: Outgoing,
}

impl ServerResponse {
    pub(crate) fn new(
        req_method: Method,
        req_version: Version,
        keep_alive: bool,
        owes_continue: bool,
        out: mpsc::Sender<OutFrame>,
        control: mpsc::UnboundedSender<Control>,
    ) -> Self {
        let role = Role::Response {
            status: 200,
            reason: None,
            req_method,
            req_version,
            keep_alive,
            send_date: true,
            owes_continue,
        };
        ServerResponse {
            out: Outgoing::new(role, out, control),
        }
    }

    pub fn status_code(&self) -> u16 {
        match &self.out.role {
            Role::Response { status, .. } => *status,
            Role::Request { .. } => unreachable!("response with request role"),
        }
    }

    pub fn set_status(&mut self, code: u16) -> Result<()> {
        if self.out.headers_sent() {
            return Err(Error::HeadersSent);
        }
        if !(100..=999).contains(&code) {
            return Err(Error::ResponseInvalidStatus);
        }
        if let Role::Response { status, .. } = &mut self.out.role {
            *status = code;
        }
        Ok(())
    }

    /// Reason phrase, if one was set. Otherwise the canonical one is sent.
    pub fn status_message(&self) -> Option<&str> {
        match &self.out.role {
            Role::Response { reason, .. } => reason.as_deref(),
            Role::Request { .. } => None,
        }
    }

    pub fn set_status_message(&mut self, message: &str) -> Result<()> {
        if self.out.headers_sent() {
            return Err(Error::HeadersSent);
        }
        if message.contains(['\r', '\n']) {
            return Err(Error::BadHeader("status message".into()));
        }
        if let Role::Response { reason, .. } = &mut self.out.role {
            *reason = Some(message.to_string());
        }
        Ok(())
    }

    /// Whether a `Date` header is added when none is set. Defaults to true.
    pub fn set_send_date(&mut self, send: bool) {
        if let Role::Response { send_date, .. } = &mut self.out.role {
            *send_date = send;
        }
    }

    pub fn headers(&self) -> &Headers {
        self.out.headers()
    }

    pub fn get_header(&self, name: &str) -> Option<&HeaderValues> {
        self.out.get_header(name)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.out.headers().contains(name)
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

    /// Whether [`ServerResponse::end`] has completed.
    pub fn finished(&self) -> bool {
        self.out.finished()
    }

    /// Idle timeout for the connection while this exchange lasts.
    pub fn set_timeout(&self, timeout: Duration) {
        self.out.set_timeout(timeout);
    }

    /// Send the interim `100 Continue`.
    pub async fn write_continue(&mut self) -> Result<()> {
        self.out.send_interim(CONTINUE).await?;
        if let Role::Response { owes_continue, .. } = &mut self.out.role {
            *owes_continue = false;
        }
        Ok(())
    }

    /// Set status and headers and commit the header block.
    pub async fn write_head<I, K, V>(&mut self, status: u16, headers: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<HeaderValues>,
    {
        self.set_status(status)?;
        for (k, v) in headers {
            self.out.set_header(k.as_ref(), v)?;
        }
        self.out.write_head().await
    }

    pub async fn write(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        self.out.write(data.as_ref()).await
    }

    /// Write the last data and finish the response.
    pub async fn end(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        self.out.end(data.as_ref()).await
    }

    /// Trailers to send after the body. Each name must be announced in a
    /// `Trailer` header.
    pub fn add_trailers(&mut self, trailers: Headers) -> Result<()> {
        self.out.add_trailers(trailers)
    }
}
