use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::{error, warn};

use murmur_core::errors::AgentError;
use murmur_core::wire::ErrorBody;

/// Failure of a chat request, rendered as `{ "error": message }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// The body could not be read as a chat request.
    #[error("invalid request: {}", .0.body_text())]
    BadRequest(#[from] JsonRejection),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Agent(e) => StatusCode::from_u16(e.status_or_default())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::BadRequest(rejection) => rejection.status(),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_kind(&self) -> &'static str {
        match self {
            Self::Agent(e) => e.error_kind(),
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.error_kind();
        let message = self.to_string();

        if status.is_server_error() {
            error!(status = status.as_u16(), error_kind = kind, message = %message, "chat request failed");
        } else {
            warn!(status = status.as_u16(), error_kind = kind, message = %message, "chat request rejected");
        }

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
