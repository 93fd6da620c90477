//! HTTP error responses.
//!
//! Every failure is rendered as `{"error": {"code": ..., "message": ...}}`.
//! `code` reuses the `category()` of the underlying error where one exists.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use warden_runtime::TurnError;

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request was unusable.
    #[error("{message}")]
    BadRequest {
        /// Stable error code.
        code: &'static str,
        /// Human-readable message.
        message: String,
    },

    /// The addressed resource does not exist.
    #[error("{message}")]
    NotFound {
        /// Stable error code.
        code: &'static str,
        /// Human-readable message.
        message: String,
    },

    /// The server is shutting down.
    #[error("server is shutting down")]
    ShuttingDown,

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. } | Self::NotFound { code, .. } => code,
            Self::ShuttingDown => "shutting_down",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let body = Json(json!({
            "error": { "code": self.code(), "message": self.to_string() }
        }));
        (status, body).into_response()
    }
}

impl From<TurnError> for ApiError {
    fn from(err: TurnError) -> Self {
        let code = err.category();
        match err {
            TurnError::EmptyContent | TurnError::InvalidRunConfig(_) => Self::BadRequest {
                code,
                message: err.to_string(),
            },
            TurnError::ThreadNotFound(_) => Self::NotFound {
                code,
                message: err.to_string(),
            },
            TurnError::ShuttingDown => Self::ShuttingDown,
            TurnError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest {
            code: "invalid_request",
            message: rejection.body_text(),
        }
    }
}
