/// API routes and handlers
pub mod middleware;
pub mod users;

use crate::context::AppContext;
use axum::{http::StatusCode, Router};
use serde::{Deserialize, Serialize};

/// Build API routes
pub fn routes(ctx: AppContext) -> Router<AppContext> {
    Router::new().nest("/api/v1/users", users::routes(ctx))
}

/// Success envelope shared by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub status_code: u16,
    pub data: T,
    pub message: String,
    pub success: bool,
}

impl<T> ApiResponse<T> {
    pub fn new(status: StatusCode, data: T, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            data,
            message: message.into(),
            success: status.is_success(),
        }
    }

    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, data, message)
    }
}
