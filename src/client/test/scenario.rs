use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::client::{Client, ClientRequest, RequestOptions};

const WAIT: Duration = Duration::from_secs(5);

/// The server end of a client request over an in-memory pipe.
pub struct FakeServer {
    io: DuplexStream,
    buf: Vec<u8>,
}

pub fn request(options: RequestOptions) -> (ClientRequest, FakeServer) {
    request_with(Client::new(), options)
}

pub fn request_with(client: Client, options: RequestOptions) -> (ClientRequest, FakeServer) {
    let (io, remote) = tokio::io::duplex(256 * 1024);
    let req = client.request_over(remote, options).unwrap();
    (req, FakeServer { io, buf: vec![] })
}

impl FakeServer {
    async fn fill(&mut self) -> bool {
        let mut b = [0; 8192];
        let n = tokio::time::timeout(WAIT, self.io.read(&mut b))
            .await
            .expect("read timed out")
            .unwrap_or(0);
        self.buf.extend_from_slice(&b[..n]);
        n > 0
    }

    /// Input up to and including `pat`.
    pub async fn read_until(&mut self, pat: &str) -> String {
        let pat = pat.as_bytes();
        loop {
            if let Some(i) = self.buf.windows(pat.len()).position(|w| w == pat) {
                let v: Vec<u8> = self.buf.drain(..i + pat.len()).collect();
                return String::from_utf8(v).unwrap();
            }
            assert!(self.fill().await, "eof waiting for {:?}", pat);
        }
    }

    pub async fn request_head(&mut self) -> String {
        self.read_until("\r\n\r\n").await
    }

    pub async fn read(&mut self, n: usize) -> String {
        while self.buf.len() < n {
            assert!(self.fill().await, "eof waiting for {} bytes", n);
        }
        String::from_utf8(self.buf.drain(..n).collect()).unwrap()
    }

    pub async fn send(&mut self, data: impl AsRef<[u8]>) {
        self.io.write_all(data.as_ref()).await.unwrap();
    }

    /// Everything until the client closes its end.
    pub async fn read_to_close(&mut self) -> String {
        while self.fill().await {}
        String::from_utf8(self.buf.drain(..).collect()).unwrap()
    }

    /// Whether the client closed its end.
    pub async fn is_closed(&mut self) -> bool {
        !self.fill().await
    }

    /// Hang up.
    pub fn close(self) {
        drop(self.io);
    }
}
