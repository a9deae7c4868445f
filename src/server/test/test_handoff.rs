use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::server::Server;

use super::scenario::Scenario;

#[tokio::test]
async fn upgrade_hands_over_transport() {
    let mut scenario = Scenario::new(Server::builder().on_upgrade(
        |req, mut io, head| async move {
            assert_eq!(req.header("upgrade").unwrap().first(), "echo");
            io.write_all(
                b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\n",
            )
            .await
            .unwrap();
            io.write_all(&head).await.unwrap();
            let mut b = [0; 4];
            io.read_exact(&mut b).await.unwrap();
            io.write_all(&b).await.unwrap();
        },
    ));

    scenario
        .send("GET /chat HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\nfirst")
        .await;

    let res = scenario.response_head().await;
    assert_eq!(res.status, 101);
    assert_eq!(scenario.read(5).await, "first");

    scenario.send("more").await;
    assert_eq!(scenario.read(4).await, "more");
}

#[tokio::test]
async fn connect_hands_over_transport() {
    let mut scenario = Scenario::new(Server::builder().on_connect(
        |req, mut io, head| async move {
            assert_eq!(req.url(), Some("a.test:443"));
            io.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await
                .unwrap();
            io.write_all(&head).await.unwrap();
        },
    ));

    scenario
        .send("CONNECT a.test:443 HTTP/1.1\r\nHost: a.test:443\r\n\r\nhi")
        .await;

    let res = scenario.response_head().await;
    assert_eq!(res.status, 200);
    assert_eq!(scenario.read(2).await, "hi");
}

#[tokio::test]
async fn handoff_is_not_a_tracked_session() {
    let mut scenario = Scenario::new(Server::builder().on_connect(|_req, io, _head| async move {
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        drop(io);
    }));

    scenario.send("CONNECT a.test:443 HTTP/1.1\r\n\r\n").await;

    let server = scenario.server.clone();
    scenario.finished().await;
    assert_eq!(server.connections(), 0);
}

#[tokio::test]
async fn upgrade_without_handler_closes() {
    let mut scenario = Scenario::new(Server::builder().on_request(|_req, mut res| async move {
        res.end("not this").await.unwrap();
    }));

    scenario
        .send("GET / HTTP/1.1\r\nConnection: upgrade\r\nUpgrade: websocket\r\n\r\n")
        .await;

    assert_eq!(scenario.read_to_close().await, "");
}

#[tokio::test]
async fn connect_without_handler_closes() {
    let mut scenario = Scenario::new(Server::builder());

    scenario.send("CONNECT a.test:443 HTTP/1.1\r\n\r\n").await;

    assert_eq!(scenario.read_to_close().await, "");
}
