//! Durable, auto-reconnecting JSON-over-WebSocket control channel to the
//! cloud control plane.

mod client;
mod error;
mod message;
mod url;

pub use client::SignalingClient;
pub use error::{Error, Result};
pub use message::{Frame, OutboundMessage};
