use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Protocol a published service speaks. Stored canonically; the local HTTP
/// API accepts `"ws"` as an alias for `Websocket` and translates it at the
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Websocket,
}

impl Protocol {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "http" => Ok(Protocol::Http),
            "websocket" | "ws" => Ok(Protocol::Websocket),
            other => Err(Error::Invalid(format!("unknown protocol `{other}`"))),
        }
    }
}

/// A published local service and the tunnel port the edge exposes it on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub protocol: Protocol,
    pub local_host: String,
    pub local_port: u16,
    pub tunnel_port: u16,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating a service. `tunnel_port` and `id` are
/// assigned by the store.
pub struct NewService {
    pub name: String,
    pub protocol: Protocol,
    pub local_host: String,
    /// `u32` so that out-of-u16-range values (e.g. `65536`) can be rejected
    /// as `Invalid` rather than silently truncated.
    pub local_port: u32,
}

/// A partial update; absent fields leave the corresponding attribute
/// unchanged. See the `update` merge semantics in the component design.
#[derive(Debug, Default, Clone)]
pub struct ServiceUpdate {
    pub name: Option<String>,
    pub local_host: Option<String>,
    pub local_port: Option<u32>,
    pub protocol: Option<Protocol>,
    pub enabled: Option<bool>,
}

impl ServiceUpdate {
    /// Whether applying this update requires restarting listeners, i.e.
    /// whether it touches anything beyond `name`.
    pub fn requires_restart(&self) -> bool {
        self.local_host.is_some()
            || self.local_port.is_some()
            || self.protocol.is_some()
            || self.enabled.is_some()
    }
}

pub(crate) fn validate_port(port: u32) -> Result<u16> {
    if port == 0 || port > u16::from(u16::MAX) as u32 {
        return Err(Error::Invalid(format!("local_port out of range: {port}")));
    }

    Ok(port as u16)
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Invalid("name must not be empty".to_string()));
    }

    Ok(())
}

/// Generates an 8-character alphanumeric id, matching the Service identity
/// scheme in the data model.
pub fn generate_id() -> String {
    use rand::Rng as _;

    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();

    (0..8)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}
