use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::server::{Server, TimeoutAction};

use super::scenario::Scenario;

#[tokio::test]
async fn idle_connection_times_out() {
    let mut scenario = Scenario::new(Server::builder().timeout(Duration::from_millis(50)));

    assert!(scenario.is_closed().await);
}

#[tokio::test]
async fn timeout_handler_keeps_open() {
    let fired = Arc::new(AtomicUsize::new(0));
    let count = fired.clone();

    let builder = Server::builder()
        .timeout(Duration::from_millis(50))
        .on_timeout(move |info| {
            assert!(info.peer.is_none());
            count.fetch_add(1, Ordering::SeqCst);
            TimeoutAction::KeepOpen
        })
        .on_request(|_req, mut res| async move {
            res.end("still here").await.unwrap();
        });
    let mut scenario = Scenario::new(builder);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    scenario.send("GET / HTTP/1.1\r\n\r\n").await;
    assert_eq!(scenario.response().await.body, "still here");
}

#[tokio::test]
async fn response_timeout_overrides_server() {
    let builder = Server::builder()
        .timeout(Duration::ZERO)
        .on_request(|_req, res| async move {
            res.set_timeout(Duration::from_millis(50));
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(res);
        });
    let mut scenario = Scenario::new(builder);

    scenario.send("GET / HTTP/1.1\r\n\r\n").await;

    assert!(scenario.is_closed().await);
}

#[tokio::test]
async fn response_timeout_ends_with_exchange() {
    let builder = Server::builder()
        .timeout(Duration::ZERO)
        .on_request(|_req, mut res| async move {
            res.set_timeout(Duration::from_millis(50));
            res.end("quick").await.unwrap();
        });
    let mut scenario = Scenario::new(builder);

    scenario.send("GET / HTTP/1.1\r\n\r\n").await;
    assert_eq!(scenario.response().await.body, "quick");

    tokio::time::sleep(Duration::from_millis(200)).await;

    scenario.send("GET / HTTP/1.1\r\n\r\n").await;
    assert_eq!(scenario.response().await.body, "quick");
}

#[tokio::test]
async fn timeout_applies_to_new_sessions() {
    let server = Server::builder().build();
    assert_eq!(server.timeout(), crate::server::DEFAULT_TIMEOUT);

    server.set_timeout(Duration::from_millis(50));
    let mut scenario = Scenario::with_server(server);

    assert!(scenario.is_closed().await);
}
