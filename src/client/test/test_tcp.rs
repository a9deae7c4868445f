use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::client::{self, ClientEvent, RequestOptions};
use crate::server::Server;
use crate::{Error, ErrorKind, Headers};

const WAIT: Duration = Duration::from_secs(5);

fn echo_server() -> Server {
    Server::builder()
        .on_request(|mut req, mut res| async move {
            assert!(req.peer_addr().is_some());
            let url = req.url().unwrap_or_default().to_string();
            let body = req.read_to_string().await.unwrap();
            let sum = req
                .trailers()
                .and_then(|t| t.get_str("x-sum"))
                .unwrap_or("-")
                .to_string();
            res.set_header("Content-Type", "text/plain").unwrap();
            res.end(format!("{} {} {}", url, body, sum)).await.unwrap();
        })
        .on_upgrade(|_req, mut io, _head| async move {
            io.write_all(b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\n")
                .await
                .unwrap();
            let mut b = [0; 4];
            io.read_exact(&mut b).await.unwrap();
            io.write_all(&b).await.unwrap();
        })
        .build()
}

#[tokio::test]
async fn get_over_loopback() {
    let listening = Arc::new(Mutex::new(None));
    let l = listening.clone();

    let server = Server::builder()
        .on_listening(move |addr| *l.lock().unwrap() = Some(addr))
        .on_request(|req, mut res| async move {
            let url = req.url().unwrap_or_default().to_string();
            res.end(format!("hello {}", url)).await.unwrap();
        })
        .build();

    let addr = server.listen("127.0.0.1:0").await.unwrap();
    assert_eq!(server.local_addr(), Some(addr));
    assert_eq!(*listening.lock().unwrap(), Some(addr));

    let mut req = client::get(RequestOptions::new("127.0.0.1", addr.port()).path("/hi"))
        .await
        .unwrap();
    let mut res = req.response().await.unwrap();

    assert_eq!(res.status_code(), Some(200));
    assert_eq!(res.read_to_string().await.unwrap(), "hello /hi");

    tokio::time::timeout(WAIT, server.close()).await.unwrap();
    assert_eq!(server.connections(), 0);
    assert_eq!(server.local_addr(), None);
}

#[tokio::test]
async fn streamed_post_with_trailers() {
    let server = echo_server();
    let addr = server.listen("127.0.0.1:0").await.unwrap();

    let options = RequestOptions::new("127.0.0.1", addr.port())
        .method(Method::POST)
        .path("/up")
        .header("Trailer", "X-Sum");
    let mut req = client::request(options).unwrap();

    req.write("part1 ").await.unwrap();
    req.write("part2").await.unwrap();
    let mut trailers = Headers::new();
    trailers.set("X-Sum", "42");
    req.add_trailers(trailers).unwrap();
    req.end("").await.unwrap();

    let mut res = req.response().await.unwrap();
    assert_eq!(res.header("content-type").unwrap().first(), "text/plain");
    assert_eq!(res.read_to_string().await.unwrap(), "/up part1 part2 42");

    server.close().await;
}

#[tokio::test]
async fn upgrade_over_loopback() {
    let server = echo_server();
    let addr = server.listen("127.0.0.1:0").await.unwrap();

    let options = RequestOptions::new("127.0.0.1", addr.port())
        .header("Connection", "Upgrade")
        .header("Upgrade", "echo");
    let mut req = client::get(options).await.unwrap();

    let ClientEvent::Upgrade(_res, mut io, _head) = req.event().await.unwrap() else {
        panic!("expected upgrade");
    };

    io.write_all(b"ping").await.unwrap();
    let mut b = [0; 4];
    io.read_exact(&mut b).await.unwrap();
    assert_eq!(&b, b"ping");
}

#[tokio::test]
async fn listen_twice() {
    let server = echo_server();
    server.listen("127.0.0.1:0").await.unwrap();

    assert!(matches!(
        server.listen("127.0.0.1:0").await,
        Err(Error::AlreadyListening)
    ));

    server.close().await;
}

#[tokio::test]
async fn connection_refused() {
    let port = {
        let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    };

    let mut req = client::request(RequestOptions::new("127.0.0.1", port)).unwrap();
    let err = req.response().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Io);
}
