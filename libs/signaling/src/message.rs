use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The wire frame exchanged over the signaling WebSocket in both
/// directions. `data` is left as a raw [`Value`] and parsed only by the
/// handler registered for `type_`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub data: Value,
}

/// A message queued for delivery on the outbound sender task. Produced by
/// any component (sync coordinator, tunnel coordinator, ...), consumed by
/// the signaling writer.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub type_: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub data: Value,
}

impl OutboundMessage {
    pub fn new(type_: impl Into<String>, data: Value) -> Self {
        Self {
            type_: type_.into(),
            from: None,
            to: None,
            data,
        }
    }

    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub(crate) fn into_frame(self) -> Frame {
        Frame {
            type_: self.type_,
            from: self.from,
            to: self.to,
            data: self.data,
        }
    }
}
