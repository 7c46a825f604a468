#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use catalog::{CatalogStore, InMemoryCatalogStore, NewService, Protocol};
use futures::StreamExt;
use secrecy::SecretString;
use signaling::SignalingClient;
use sync::SyncCoordinator;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Reconnecting to the cloud must trigger exactly one full-catalog
/// `service-sync-batch` with `operation=sync`, carrying every service
/// currently in the catalog.
#[tokio::test]
async fn reconnect_triggers_exactly_one_full_resync() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let mut batches = Vec::new();
        let deadline = tokio::time::sleep(Duration::from_millis(500));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                message = ws.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                        if value["type"] == "service-sync-batch" {
                            batches.push(value);
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {}
                    _ => break,
                }
            }
        }

        batches
    });

    let catalog: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::new());
    catalog
        .add(
            NewService {
                name: "web".to_string(),
                protocol: Protocol::Http,
                local_host: "127.0.0.1".to_string(),
                local_port: 8080,
            },
            9001,
        )
        .unwrap();

    let base = Url::parse(&format!("http://{addr}")).unwrap();
    let signaling = SignalingClient::new(base, "127.0.0.1", 0);
    let _coordinator = SyncCoordinator::install(signaling.clone(), catalog.clone());

    signaling.connect("edge-1".to_string(), SecretString::from("token".to_string()));

    let batches = tokio::time::timeout(Duration::from_secs(2), server).await.unwrap().unwrap();

    signaling.close().await;

    assert_eq!(batches.len(), 1, "expected exactly one resync batch, got {batches:?}");
    assert_eq!(batches[0]["data"]["operation"], "sync");
    assert_eq!(batches[0]["data"]["services"].as_array().unwrap().len(), 1);
}
