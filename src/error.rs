use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("no accounts available: {0}")]
    NoAccountsAvailable(String),

    #[error("account capacity exceeded (max {0})")]
    CapacityExceeded(usize),

    #[error("upstream unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("upstream transient failure: {0}")]
    UpstreamTransient(String),

    #[error("upstream rejected request ({status}): {message}")]
    UpstreamClient { status: u16, message: String },

    #[error("invalid request: {0}")]
    Translation(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NoAccountsAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::CapacityExceeded(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::UpstreamTransient(_) | AppError::Network(_) => StatusCode::BAD_GATEWAY,
            AppError::UpstreamClient { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::Translation(_) => StatusCode::BAD_REQUEST,
            AppError::Io(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::NoAccountsAvailable(_) => "no_accounts_available",
            AppError::CapacityExceeded(_) => "capacity_exceeded",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::RateLimited(_) => "rate_limited",
            AppError::UpstreamTransient(_) | AppError::Network(_) => "upstream_error",
            AppError::UpstreamClient { .. } => "invalid_request_error",
            AppError::Translation(_) => "invalid_request_error",
            AppError::Io(_) | AppError::Config(_) | AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
