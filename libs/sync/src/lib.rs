//! Bridges service-catalog mutations to the signaling client: per-mutation
//! sync with ack correlation, plus full resync on every (re)connect.

mod callback;
mod coordinator;
mod message;

pub use callback::{CallbackTable, SyncCallback};
pub use coordinator::SyncCoordinator;
pub use message::{AckStatus, BatchOperation, ServiceSync, ServiceSyncAck, ServiceSyncBatch, SyncOperation};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use catalog::{InMemoryCatalogStore, NewService, Protocol};
    use signaling::SignalingClient;
    use url::Url;

    use super::*;

    #[tokio::test]
    async fn notify_registers_a_callback() {
        let catalog = Arc::new(InMemoryCatalogStore::new());
        let service = catalog
            .add(
                NewService {
                    name: "web".to_string(),
                    protocol: Protocol::Http,
                    local_host: "localhost".to_string(),
                    local_port: 80,
                },
                8001,
            )
            .unwrap();

        let signaling = SignalingClient::new(Url::parse("http://127.0.0.1:1").unwrap(), "127.0.0.1", 0);
        let coordinator = SyncCoordinator::install(signaling, catalog);

        coordinator.notify(SyncOperation::Created, &service);

        assert_eq!(coordinator.pending_callbacks(), 1);
    }
}
