//! Plain-text errors for the webhook endpoint

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use meridian_revenue::RevenueError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("No event data")]
    NoEventData,
    #[error("Internal Server Error")]
    Internal,
}

impl From<RevenueError> for ApiError {
    fn from(err: RevenueError) -> Self {
        match err {
            RevenueError::Unauthorized => ApiError::Unauthorized,
            RevenueError::NoEventData => ApiError::NoEventData,
            // Logged by the ingestor before it returned
            _ => ApiError::Internal,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NoEventData => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}
