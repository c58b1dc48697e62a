//! Error type returned by HTTP handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::auth::{AuthError, RateLimited};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Forbidden(String),
    #[error(transparent)]
    RateLimited(#[from] RateLimited),
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ApiError::InvalidRequest(message.into())
    }

    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Auth(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::Store(e) => match e {
                StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                StoreError::AlreadyExists => (StatusCode::CONFLICT, "already_exists"),
                StoreError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
                StoreError::QuotaExceeded(_) => (StatusCode::FORBIDDEN, "quota_exceeded"),
                StoreError::PlanRestricted(_) => (StatusCode::FORBIDDEN, "plan_restricted"),
                StoreError::InvalidPlanTier(_) => (StatusCode::BAD_REQUEST, "invalid_plan_tier"),
                StoreError::UploadTargetExpired | StoreError::UploadTargetUsed => {
                    (StatusCode::GONE, "upload_url_unavailable")
                }
                StoreError::DatabaseError(_) | StoreError::IoError(_) | StoreError::InvalidConfig(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        // Storage details stay in the logs
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
