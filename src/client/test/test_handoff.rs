use http::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::client::{ClientEvent, RequestOptions};
use crate::Error;

use super::scenario::request;

fn upgrade_options() -> RequestOptions {
    RequestOptions::new("a.test", 80)
        .path("/chat")
        .header("Connection", "Upgrade")
        .header("Upgrade", "echo")
}

#[tokio::test]
async fn upgrade_event() {
    let (mut req, mut server) = request(upgrade_options());

    req.end("").await.unwrap();
    server.request_head().await;
    server
        .send("HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\nextra")
        .await;

    let ClientEvent::Upgrade(res, mut io, head) = req.event().await.unwrap() else {
        panic!("expected upgrade");
    };
    assert_eq!(res.status_code(), Some(101));
    assert_eq!(&head[..], b"extra");

    io.write_all(b"ping").await.unwrap();
    assert_eq!(server.read(4).await, "ping");

    server.send("pong").await;
    let mut b = [0; 4];
    io.read_exact(&mut b).await.unwrap();
    assert_eq!(&b, b"pong");
}

#[tokio::test]
async fn upgrade_is_not_a_response() {
    let (mut req, mut server) = request(upgrade_options());

    req.end("").await.unwrap();
    server.request_head().await;
    server
        .send("HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\n")
        .await;

    assert!(matches!(req.response().await, Err(Error::HandedOff("upgrade"))));
}

#[tokio::test]
async fn upgrade_declined() {
    let (mut req, mut server) = request(upgrade_options());

    req.end("").await.unwrap();
    server.request_head().await;
    server
        .send("HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nno")
        .await;

    let mut res = req.response().await.unwrap();
    assert_eq!(res.read_to_string().await.unwrap(), "no");
}

#[tokio::test]
async fn connect_event() {
    let options = RequestOptions::new("proxy.test", 3128)
        .method(Method::CONNECT)
        .path("a.test:443");
    let (mut req, mut server) = request(options);

    req.end("").await.unwrap();
    let head = server.request_head().await;
    assert!(head.starts_with("CONNECT a.test:443 HTTP/1.1\r\n"));
    assert!(!head.contains("Content-Length"));

    server
        .send("HTTP/1.1 200 Connection Established\r\n\r\n")
        .await;

    let ClientEvent::Connect(res, mut io, head) = req.event().await.unwrap() else {
        panic!("expected connect");
    };
    assert_eq!(res.status_code(), Some(200));
    assert!(head.is_empty());

    io.write_all(b"tunnel").await.unwrap();
    assert_eq!(server.read(6).await, "tunnel");
}

#[tokio::test]
async fn connect_refused() {
    let options = RequestOptions::new("proxy.test", 3128)
        .method(Method::CONNECT)
        .path("a.test:443");
    let (mut req, mut server) = request(options);

    req.end("").await.unwrap();
    server.request_head().await;
    server
        .send("HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n")
        .await;

    let res = req.response().await.unwrap();
    assert_eq!(res.status_code(), Some(407));
}
