//! Streaming http/1.1 server and client sessions on tokio.
//!
//! A session owns one transport. It parses incoming messages into an
//! [`IncomingMessage`] with a flow controlled [`BodyStream`], and frames
//! outgoing ones written through [`ServerResponse`] or [`ClientRequest`].
//!
//! ```no_run
//! use hootio::{Server, ServerResponse, IncomingMessage};
//!
//! # async fn run() -> Result<(), hootio::Error> {
//! let server = Server::builder()
//!     .on_request(|mut req: IncomingMessage, mut res: ServerResponse| async move {
//!         let body = req.read_to_string().await.unwrap_or_default();
//!         let _ = res.set_header("Content-Type", "text/plain");
//!         let _ = res.end(body).await;
//!     })
//!     .build();
//!
//! server.listen("127.0.0.1:8080").await?;
//! # Ok(())
//! # }
//! ```
//!
//! `CONNECT` and `Upgrade` requests are not answered by the session. The
//! transport is handed to the application as [`Upgraded`] together with
//! bytes already read past the header block.

#[macro_use]
extern crate log;

// Re-export this
pub use http;

mod error;
pub use error::{Error, ErrorKind, Result};

mod util;

mod ext;

mod header;
pub use header::{HeaderValues, Headers};

mod parser;
pub use parser::StartLine;

mod chunk;

mod body;

mod encoding;
pub use encoding::Encoding;

mod stream;
pub use stream::{BodyState, BodyStream, Chunk, FlowHandle};

mod incoming;
pub use incoming::IncomingMessage;

mod out;

mod session;
pub use session::{ConnectionId, Transport};

mod upgrade;
pub use upgrade::Upgraded;

pub mod server;
pub use server::{ConnectionInfo, Server, ServerBuilder, ServerResponse};
pub use server::{ShutdownMode, TimeoutAction};

pub mod client;
pub use client::{get, request};
pub use client::{Client, ClientEvent, ClientRequest, RequestOptions};
