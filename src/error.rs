/// Unified error types for the Vidshare backend
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or malformed input
    #[error("{0}")]
    Validation(String),

    /// Duplicate username or email
    #[error("{0}")]
    Conflict(String),

    /// Bad credentials or a rejected refresh rotation
    #[error("{0}")]
    AuthFailed(String),

    /// Missing or invalid access token
    #[error("{0}")]
    Unauthorized(String),

    /// Image host errors
    #[error("{0}")]
    Upstream(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// HTTP status this error maps to
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::AuthFailed(_) | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Upstream(_)
            | AppError::Internal(_)
            | AppError::Database(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error body returned to clients
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub status_code: u16,
    pub message: String,
    pub success: bool,
}

/// Convert AppError to HTTP response
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match self {
            AppError::Internal(_) | AppError::Database(_) | AppError::Io(_) => {
                tracing::error!(error = %self, "request failed");
                "Internal server error".to_string() // Don't leak details
            }
            _ => self.to_string(),
        };

        let body = Json(ErrorResponse {
            status_code: status.as_u16(),
            message,
            success: false,
        });

        (status, body).into_response()
    }
}

/// Result type alias for service operations
pub type AppResult<T> = Result<T, AppError>;
