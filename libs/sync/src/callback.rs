use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

use crate::message::SyncOperation;

/// Tracks one in-flight `service-sync` message until its ack arrives (or it
/// is superseded by a reconnect resync). At most one entry per message id.
#[derive(Debug, Clone)]
pub struct SyncCallback {
    pub operation: SyncOperation,
    pub subject_id: String,
    pub created_at: Instant,
    pub retry: u32,
}

#[derive(Default)]
pub struct CallbackTable {
    inner: Mutex<HashMap<String, SyncCallback>>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, message_id: String, operation: SyncOperation, subject_id: String) {
        self.inner.lock().insert(
            message_id,
            SyncCallback {
                operation,
                subject_id,
                created_at: Instant::now(),
                retry: 0,
            },
        );
    }

    /// Removes and returns the callback for `message_id`, if any. Used both
    /// on ack and when an enqueue attempt fails (the spec requires the
    /// callback not outlive a message that was never actually sent).
    pub fn take(&self, message_id: &str) -> Option<SyncCallback> {
        self.inner.lock().remove(message_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
