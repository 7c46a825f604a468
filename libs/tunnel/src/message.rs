use serde::{Deserialize, Serialize};

/// Inbound `connect-request` / `api-connect-request`: a partial peer config.
/// Only `id` is required; everything else the cloud may send is opaque to
/// us and ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectRequest {
    pub id: String,
    #[serde(default)]
    pub account_id: Option<String>,
    /// The remote peer's WireGuard static public key, hex-encoded. Used to
    /// program the single WG peer entry once the data channel opens.
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Outbound `connect-response` / `api-connect-response`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectResponse {
    pub index: u8,
    pub id: String,
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub public_key: String,
    pub edge_ip: String,
    pub client_ip: String,
}

/// Outbound `turn-request`: an empty envelope.
#[derive(Debug, Clone, Serialize, Default)]
pub struct TurnRequest {}

/// Inbound `turn-response`.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnResponse {
    pub username: String,
    pub password: String,
    pub ttl: u64,
    pub urls: Vec<String>,
}

/// `offer` / `answer`, both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptionMessage {
    pub sdp: String,
}

/// `ice-candidate`, both directions. Field names match
/// `RTCIceCandidateInit` directly so candidates round-trip without
/// translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidateMessage {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_mline_index: Option<u16>,
}
