/// Error taxonomy for the tunnel coordinator: WebRTC negotiation, the
/// WireGuard bridge, and TUN device bring-up.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed peer protocol message: {0}")]
    PeerProtocol(String),

    #[error("platform resource unavailable: {0}")]
    PlatformResource(String),

    #[error("bind is closed")]
    BindClosed,

    #[error("signaling transport error: {0}")]
    Transport(String),

    #[error("exhausted: {0}")]
    Exhausted(String),
}

pub type Result<T> = std::result::Result<T, Error>;
