/// Error taxonomy for the catalog store and port allocator.
///
/// Variants map directly onto HTTP status codes at the local API boundary;
/// see `service-manager`'s axum router for the conversion.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid: {0}")]
    Invalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("exhausted: {0}")]
    Exhausted(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;
