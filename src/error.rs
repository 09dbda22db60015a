use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provider {0} must be played through its own embed player")]
    UnsupportedProvider(String),

    #[error("Too many redirects (gave up after {0} hops)")]
    TooManyRedirects(usize),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Remux process failed: {0}")]
    RemuxProcessFailure(String),

    #[error("Rate limit exceeded, retry in {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::UnsupportedProvider(_) => "unsupported_provider",
            AppError::TooManyRedirects(_) => "too_many_redirects",
            AppError::UpstreamUnreachable(_) => "upstream_unreachable",
            AppError::UpstreamTimeout(_) => "upstream_timeout",
            AppError::RemuxProcessFailure(_) => "remux_process_failure",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::Internal(_) => "internal",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) | AppError::UnsupportedProvider(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::TooManyRedirects(_)
            | AppError::UpstreamUnreachable(_)
            | AppError::RemuxProcessFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        if let AppError::RateLimited { retry_after } = self {
            builder.insert_header(("Retry-After", retry_after.to_string()));
        }
        builder.json(json!({ "error": self.to_string(), "code": self.code() }))
    }
}

pub type AppResult<T> = Result<T, AppError>;
