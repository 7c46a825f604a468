#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("outbound queue is full, message dropped")]
    QueueFull,
}

pub type Result<T> = std::result::Result<T, Error>;
