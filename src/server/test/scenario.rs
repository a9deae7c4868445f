use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use crate::server::{Server, ServerBuilder};

const WAIT: Duration = Duration::from_secs(5);

/// A server session over an in-memory pipe, with the test playing client.
pub struct Scenario {
    pub server: Server,
    pub session: JoinHandle<()>,
    io: DuplexStream,
    buf: Vec<u8>,
}

/// A response as read off the wire.
#[derive(Debug)]
pub struct Response {
    pub head: String,
    pub status: u16,
    pub body: String,
    pub trailers: String,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_all(name).into_iter().next()
    }

    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.head
            .split("\r\n")
            .skip(1)
            .filter_map(|l| l.split_once(':'))
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim())
            .collect()
    }
}

fn find(buf: &[u8], pat: &[u8]) -> Option<usize> {
    buf.windows(pat.len()).position(|w| w == pat)
}

impl Scenario {
    pub fn new(builder: ServerBuilder) -> Self {
        Self::with_server(builder.build())
    }

    pub fn with_server(server: Server) -> Self {
        let (io, remote) = tokio::io::duplex(256 * 1024);
        let session = server.serve_connection(remote, None);
        Scenario {
            server,
            session,
            io,
            buf: vec![],
        }
    }

    pub async fn send(&mut self, data: impl AsRef<[u8]>) {
        self.io.write_all(data.as_ref()).await.unwrap();
    }

    /// Read more input. false on eof.
    async fn fill(&mut self) -> bool {
        let mut b = [0; 8192];
        let n = tokio::time::timeout(WAIT, self.io.read(&mut b))
            .await
            .expect("read timed out")
            .unwrap_or(0);
        self.buf.extend_from_slice(&b[..n]);
        n > 0
    }

    async fn until(&mut self, pat: &[u8]) -> usize {
        loop {
            if let Some(i) = find(&self.buf, pat) {
                return i;
            }
            assert!(self.fill().await, "eof waiting for {:?}", pat);
        }
    }

    async fn take(&mut self, n: usize) -> Vec<u8> {
        while self.buf.len() < n {
            assert!(self.fill().await, "eof waiting for {} bytes", n);
        }
        self.buf.drain(..n).collect()
    }

    /// Read a response head only, e.g. the answer to a `HEAD`.
    pub async fn response_head(&mut self) -> Response {
        let end = self.until(b"\r\n\r\n").await + 4;
        let head = String::from_utf8(self.take(end).await).unwrap();
        let status = head[9..12].parse().unwrap();

        Response {
            head,
            status,
            body: String::new(),
            trailers: String::new(),
        }
    }

    /// Read one complete response, interim ones included.
    pub async fn response(&mut self) -> Response {
        let mut res = self.response_head().await;
        let status = res.status;

        if (100..200).contains(&status) || status == 204 || status == 304 {
            return res;
        }

        let body = if res.header("transfer-encoding") == Some("chunked") {
            self.dechunk(&mut res.trailers).await
        } else if let Some(len) = res.header("content-length") {
            let len = len.parse().unwrap();
            self.take(len).await
        } else {
            while self.fill().await {}
            self.buf.drain(..).collect()
        };

        res.body = String::from_utf8(body).unwrap();
        res
    }

    async fn dechunk(&mut self, trailers: &mut String) -> Vec<u8> {
        let mut body = vec![];
        loop {
            let line_end = self.until(b"\r\n").await;
            let line = String::from_utf8(self.take(line_end + 2).await).unwrap();
            let size = usize::from_str_radix(line.split(';').next().unwrap().trim(), 16).unwrap();

            if size == 0 {
                let end = self.until(b"\r\n").await;
                if end > 0 {
                    let end = self.until(b"\r\n\r\n").await + 2;
                    *trailers = String::from_utf8(self.take(end).await).unwrap();
                }
                self.take(2).await;
                return body;
            }

            body.extend(self.take(size).await);
            self.take(2).await;
        }
    }

    /// Exactly `n` raw bytes, e.g. after a protocol switch.
    pub async fn read(&mut self, n: usize) -> String {
        String::from_utf8(self.take(n).await).unwrap()
    }

    /// Everything until the session closes the pipe.
    pub async fn read_to_close(&mut self) -> String {
        while self.fill().await {}
        String::from_utf8(self.buf.drain(..).collect()).unwrap()
    }

    pub async fn is_closed(&mut self) -> bool {
        !self.fill().await && self.buf.is_empty()
    }

    /// Hang up and wait for the session task to finish.
    pub async fn finished(self) {
        let Scenario { session, io, .. } = self;
        drop(io);
        tokio::time::timeout(WAIT, session)
            .await
            .expect("session did not finish")
            .unwrap();
    }
}
