use crate::{
    models::upload::UploadResponse,
    services::file_service::{DeleteFailure, FileError},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    /// Map an ingestion failure onto the upload envelope.
    pub fn upload_failed(err: FileError) -> Self {
        match err {
            FileError::SizeExceeded { .. } => Self::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "File size exceeds maximum allowed size",
            ),
            other => Self::new(other.status(), format!("Failed to save file: {other}")),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(UploadResponse::failure(self.message))).into_response()
    }
}

impl From<FileError> for AppError {
    fn from(err: FileError) -> Self {
        AppError::new(err.status(), err.to_string())
    }
}

impl From<DeleteFailure> for AppError {
    fn from(failure: DeleteFailure) -> Self {
        failure.error.into()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
