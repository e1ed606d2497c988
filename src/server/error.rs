use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Failed to parse payload: {0}")]
    BadPayload(String),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Source control request failed: {0}")]
    Upstream(String),
}

impl WebhookError {
    fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::BadPayload(_) => StatusCode::BAD_REQUEST,
            WebhookError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WebhookError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            WebhookError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            WebhookError::BadPayload(_) => "BAD_PAYLOAD",
            WebhookError::Unauthorized(_) => "UNAUTHORIZED",
            WebhookError::NotConfigured(_) => "NOT_CONFIGURED",
            WebhookError::Upstream(_) => "UPSTREAM_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.error_code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type WebhookResult<T> = Result<T, WebhookError>;
