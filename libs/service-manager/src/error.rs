use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Error taxonomy for the service manager, extending the catalog's with the
/// manager's own lifecycle errors. Implements the HTTP-status mapping used
/// at the local API boundary.
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

    #[error("service manager already started")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<catalog::Error> for Error {
    fn from(error: catalog::Error) -> Self {
        match error {
            catalog::Error::Invalid(m) => Error::Invalid(m),
            catalog::Error::NotFound(m) => Error::NotFound(m),
            catalog::Error::Conflict(m) => Error::Conflict(m),
            catalog::Error::Exhausted(m) => Error::Exhausted(m),
            catalog::Error::Storage(m) => Error::Storage(m),
        }
    }
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::Invalid(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Exhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::AlreadyStarted => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "success": false,
            "error": { "message": self.to_string(), "status": status.as_u16() },
        }));

        (status, body).into_response()
    }
}
