//! # Error Types
//!
//! The server-side error enum and its HTTP mapping. Query compilation
//! itself is total and contributes no variants; everything here comes from
//! the edges: config lookup, database execution, payload decoding.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("organism '{0}' not found in config")]
    UnknownOrganism(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::UnknownOrganism(_) => StatusCode::NOT_FOUND,
            HubError::Database(_) | HubError::Config(_) | HubError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!("{self}");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Failure while decoding one compressed sequence payload. These are logged
/// and the row skipped; they never abort a whole response.
#[derive(Debug, Error)]
pub enum DecompressionError {
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("zstd decompression failed: {0}")]
    Zstd(#[from] std::io::Error),

    #[error("decompressed payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
