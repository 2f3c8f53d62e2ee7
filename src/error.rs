//! Crate-wide error type and its HTTP status mapping.
//!
//! Every subsystem surfaces one of these kinds; the HTTP layer converts them
//! to `{error: <string>}` bodies with the matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Encoder models are not loaded. Image search is rejected with 503;
    /// text search falls back to filename matching before reaching this.
    #[error("embedding models are not loaded")]
    NotReady,

    #[error("{0}")]
    InvalidInput(String),

    /// 401 from the weights repository. Non-retryable.
    #[error("authentication with the weights repository failed")]
    AuthFailed,

    /// 404 from the weights repository. Non-retryable.
    #[error("remote file not found: {0}")]
    MissingRemoteFile(String),

    /// The stored credential was sealed on a different host; the user must
    /// re-enter the token.
    #[error("credential was sealed on a different host")]
    DecryptFailed,

    /// A download session is already running.
    #[error("model download already in progress")]
    Conflict,

    #[error("{0} not found")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::AuthFailed => StatusCode::UNAUTHORIZED,
            Error::Conflict => StatusCode::CONFLICT,
            Error::NotFound(_) | Error::MissingRemoteFile(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
