use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use notifier_models::{errors::ValidationError, web::ErrorDetail};

/// Failure surfaced to HTTP callers as `{"detail": ...}`.
#[derive(Debug)]
pub enum ApiError {
    /// The body could not be read as the expected JSON document.
    Rejected { status: StatusCode, detail: String },
    Validation(ValidationError),
    /// The message could not be queued; the caller should retry.
    Unavailable(&'static str),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Rejected { status, .. } => *status,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Rejected { detail, .. } => detail.clone(),
            ApiError::Validation(err) => err.to_string(),
            ApiError::Unavailable(detail) => (*detail).to_string(),
            ApiError::Internal(message) => format!("Internal server error: {message}"),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.detail();
        if status.is_server_error() {
            error!("Request failed with {}: {}", status, detail);
        }
        (status, Json(ErrorDetail { detail })).into_response()
    }
}
