#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use secrecy::SecretString;
use signaling::SignalingClient;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

#[tokio::test]
async fn handler_is_invoked_for_known_frame_type() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        ws.send(Message::Text(
            r#"{"type":"service-sync-ack","data":{"message_id":"1","status":"success"}}"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

        // Keep the socket open a little longer so the client's reader has
        // time to dispatch before the task is dropped.
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let base = Url::parse(&format!("http://{addr}")).unwrap();
    let client = SignalingClient::new(base, "127.0.0.1", 0);

    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = received.clone();
    client.register_handler("service-sync-ack", move |_frame, _conn_token| {
        let received = received_clone.clone();
        Box::pin(async move {
            received.fetch_add(1, Ordering::SeqCst);
        })
    });

    client.connect("edge-1".to_string(), SecretString::from("token".to_string()));

    tokio::time::timeout(Duration::from_secs(2), async {
        while received.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("handler was never invoked");

    server.abort();
    client.close().await;
}

#[tokio::test]
async fn send_fails_not_connected_before_any_connection() {
    let base = Url::parse("http://127.0.0.1:1").unwrap();
    let client = SignalingClient::new(base, "127.0.0.1", 0);

    let err = client
        .send("turn-request", None, None, serde_json::json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, signaling::Error::NotConnected));
}
