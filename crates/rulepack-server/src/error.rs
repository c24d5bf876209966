//! Error handling for the API server

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rulepack_registry::api::ErrorBody;
use thiserror::Error;
use tracing::error;

use crate::repository::RepositoryError;

/// Result type for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout error: operation timed out")]
    Timeout,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Multipart(e) => e.status(),
            ApiError::Repository(e) => match e {
                RepositoryError::NotFound(_) => StatusCode::NOT_FOUND,
                RepositoryError::AlreadyExists { .. } => StatusCode::CONFLICT,
                RepositoryError::WriteConflict(_) | RepositoryError::PoolTimeout(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                },
            },
            ApiError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ApiError::Config(_) | ApiError::Internal(_) | ApiError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Multipart(e) => e.body_text(),
            ApiError::Timeout => "Request timed out".to_string(),
            ApiError::Config(_) | ApiError::Internal(_) | ApiError::Io(_) => {
                error!("Request failed: {}", self);
                "Internal server error".to_string()
            },
            ApiError::Repository(RepositoryError::AlreadyExists { name, version }) => {
                format!("{}@{} already exists", name, version)
            },
            _ => self.to_string(),
        };

        let body = Json(ErrorBody {
            error: message,
            status: status.as_u16(),
        });
        (status, body).into_response()
    }
}
