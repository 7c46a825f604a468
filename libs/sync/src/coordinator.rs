use std::sync::Arc;

use catalog::{CatalogStore, Service};
use signaling::SignalingClient;

use crate::callback::CallbackTable;
use crate::message::{AckStatus, BatchOperation, ServiceSync, ServiceSyncAck, ServiceSyncBatch, SyncOperation};

/// Ties catalog mutations to the signaling client: every successful Service
/// Manager mutation becomes a `service-sync` message with a tracked
/// callback; every (re)connect triggers a full `service-sync-batch` resync.
pub struct SyncCoordinator {
    signaling: SignalingClient,
    catalog: Arc<dyn CatalogStore>,
    callbacks: Arc<CallbackTable>,
}

impl SyncCoordinator {
    /// Builds the coordinator and wires its `service-sync-ack` handler and
    /// on-connect resync handler into `signaling`. Call once during
    /// startup, before `signaling.connect(...)`.
    pub fn install(signaling: SignalingClient, catalog: Arc<dyn CatalogStore>) -> Self {
        let callbacks = Arc::new(CallbackTable::new());

        let ack_callbacks = callbacks.clone();
        signaling.register_handler("service-sync-ack", move |frame, _conn_token| {
            let callbacks = ack_callbacks.clone();
            Box::pin(async move { handle_ack(&callbacks, frame.data) })
        });

        let resync_signaling = signaling.clone();
        let resync_catalog = catalog.clone();
        signaling.add_on_connect(move || {
            let signaling = resync_signaling.clone();
            let catalog = resync_catalog.clone();
            Box::pin(async move { full_resync(&signaling, catalog.as_ref()).await })
        });

        Self {
            signaling,
            catalog,
            callbacks,
        }
    }

    /// Enqueues a `service-sync` message for a single mutation and
    /// registers a callback for its ack. Drops (with a warning) and removes
    /// the callback if the outbound channel is full; the next reconnect
    /// resync recovers the state.
    pub fn notify(&self, operation: SyncOperation, service: &Service) {
        let message_id = uuid::Uuid::new_v4().to_string();

        self.callbacks
            .register(message_id.clone(), operation, service.id.clone());

        let payload = ServiceSync {
            message_id: message_id.clone(),
            operation,
            service: service.clone(),
        };
        let data = match serde_json::to_value(&payload) {
            Ok(data) => data,
            Err(error) => {
                tracing::warn!(%error, "failed to serialize service-sync payload");
                self.callbacks.take(&message_id);
                return;
            }
        };

        let message = signaling::OutboundMessage::new("service-sync", data);

        if self.signaling.outbound_channel().try_send(message).is_err() {
            tracing::warn!(
                message_id = %message_id,
                subject_id = %service.id,
                "outbound queue full, dropping sync message"
            );
            self.callbacks.take(&message_id);
        }
    }

    /// Emits a `service-sync-batch` with `operation=remove` ahead of the
    /// catalog being emptied, as required by `clear()`.
    pub fn notify_clear(&self, services: Vec<Service>) {
        send_batch(&self.signaling, BatchOperation::Remove, services);
    }

    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }
}

async fn full_resync(signaling: &SignalingClient, catalog: &dyn CatalogStore) -> anyhow::Result<()> {
    let services = catalog.list();
    send_batch(signaling, BatchOperation::Sync, services);
    Ok(())
}

fn send_batch(signaling: &SignalingClient, operation: BatchOperation, services: Vec<Service>) {
    let message_id = uuid::Uuid::new_v4().to_string();
    let payload = ServiceSyncBatch {
        message_id,
        operation,
        services,
    };

    let data = match serde_json::to_value(&payload) {
        Ok(data) => data,
        Err(error) => {
            tracing::warn!(%error, "failed to serialize service-sync-batch payload");
            return;
        }
    };

    let message = signaling::OutboundMessage::new("service-sync-batch", data);

    if signaling.outbound_channel().try_send(message).is_err() {
        tracing::warn!("outbound queue full, dropping service-sync-batch");
    }
}

fn handle_ack(callbacks: &CallbackTable, data: serde_json::Value) {
    let ack: ServiceSyncAck = match serde_json::from_value(data) {
        Ok(ack) => ack,
        Err(error) => {
            tracing::warn!(%error, "failed to parse service-sync-ack");
            return;
        }
    };

    let Some(callback) = callbacks.take(&ack.message_id) else {
        tracing::debug!(message_id = %ack.message_id, "ack for unknown message id, dropping");
        return;
    };

    match ack.status {
        AckStatus::Success => tracing::info!(
            operation = ?callback.operation,
            subject_id = %callback.subject_id,
            "sync acknowledged"
        ),
        AckStatus::Error => tracing::warn!(
            operation = ?callback.operation,
            subject_id = %callback.subject_id,
            error = ?ack.error,
            message = ?ack.message,
            "sync rejected by cloud"
        ),
    }
}
