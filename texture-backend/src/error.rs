//! Error taxonomy for the upload and texturing operations.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum RoomError {
    /// Uploaded bytes are not a decodable raster image
    #[error("Could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// Segmentation or layout estimation failed
    #[error("Wall estimation failed: {0}")]
    Inference(String),

    /// Segmentation + layout estimation exceeded the configured bound
    #[error("Wall estimation timed out after {0}s")]
    Timeout(u64),

    /// Texture requested before any room photo was committed
    #[error("Upload room first")]
    Precondition,

    /// Texture identifier resolves outside the texture library
    #[error("Invalid texture name: {0}")]
    PathEscape(String),

    /// Texture file missing or unreadable
    #[error("Texture not available: {0}")]
    Texture(String),

    /// Persisted artifact missing or corrupt
    #[error("Room state unavailable: {0}")]
    Storage(String),

    /// A newer upload was committed while the request was running
    #[error("Room photo changed while the texture was being applied")]
    Superseded,

    /// Request body is not the expected JSON shape
    #[error("Invalid request body: {0}")]
    InvalidRequest(#[from] axum::extract::rejection::JsonRejection),

    #[error("Multipart error: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),

    #[error("File too large: maximum size is {max_mb} MB")]
    FileTooLarge { max_mb: usize },

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, RoomError>;

impl RoomError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        RoomError::Storage(err.to_string())
    }

    pub fn inference(err: impl std::fmt::Display) -> Self {
        RoomError::Inference(err.to_string())
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            RoomError::Decode(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DECODE_ERROR"),
            RoomError::Inference(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INFERENCE_ERROR"),
            RoomError::Timeout(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INFERENCE_ERROR"),
            RoomError::Precondition => (StatusCode::BAD_REQUEST, "PRECONDITION_FAILED"),
            RoomError::PathEscape(_) => (StatusCode::BAD_REQUEST, "INVALID_TEXTURE"),
            RoomError::Texture(_) => (StatusCode::NOT_FOUND, "TEXTURE_NOT_FOUND"),
            RoomError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            RoomError::Superseded => (StatusCode::CONFLICT, "SUPERSEDED"),
            RoomError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            RoomError::Multipart(_) => (StatusCode::BAD_REQUEST, "MULTIPART_ERROR"),
            RoomError::FileTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE"),
            RoomError::Join(_) => (StatusCode::INTERNAL_SERVER_ERROR, "TASK_ERROR"),
        }
    }

    /// Short message safe to show the user; internal details stay in the log
    fn public_message(&self) -> String {
        match self {
            RoomError::Precondition
            | RoomError::Superseded
            | RoomError::PathEscape(_)
            | RoomError::InvalidRequest(_)
            | RoomError::FileTooLarge { .. } => self.to_string(),
            RoomError::Texture(_) => "Texture could not be applied".to_string(),
            _ => "Error".to_string(),
        }
    }
}

/// Error response body, shaped like the texture endpoint's success reply
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub state: String,
    pub code: String,
    pub msg: String,
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            error!("Request failed ({}): {}", code, self);
        } else {
            warn!("Request rejected ({}): {}", code, self);
        }

        let body = ErrorResponse {
            state: "error".to_string(),
            code: code.to_string(),
            msg: self.public_message(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RoomError::Precondition.status_and_code().0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RoomError::PathEscape("../x".into()).status_and_code().0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RoomError::inference("boom").status_and_code().0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(RoomError::Superseded.status_and_code().0, StatusCode::CONFLICT);
    }

    #[test]
    fn test_internal_details_are_not_exposed() {
        let err = RoomError::storage("manifest.json: unexpected EOF");
        assert_eq!(err.public_message(), "Error");
        assert_eq!(RoomError::Precondition.public_message(), "Upload room first");
    }
}
