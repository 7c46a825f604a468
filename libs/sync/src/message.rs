use catalog::Service;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Created,
    Updated,
    Deleted,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOperation {
    Sync,
    Remove,
}

#[derive(Debug, Serialize)]
pub struct ServiceSync {
    pub message_id: String,
    pub operation: SyncOperation,
    pub service: Service,
}

#[derive(Debug, Serialize)]
pub struct ServiceSyncBatch {
    pub message_id: String,
    pub operation: BatchOperation,
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Error,
}

#[derive(Debug, Deserialize)]
pub struct ServiceSyncAck {
    pub message_id: String,
    pub status: AckStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
