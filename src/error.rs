//! Error taxonomy
//!
//! Every failure that crosses a component boundary is one of the closed set
//! of [`ErrorCode`]s. The API layer maps them onto HTTP statuses and the
//! `{"error": {code, message, details}}` envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Closed set of machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    Conflict,
    Busy,
    UnsupportedFormat,
    CorruptFile,
    Timeout,
    IoError,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::Busy => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorCode::CorruptFile => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::IoError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::Busy => "busy",
            ErrorCode::UnsupportedFormat => "unsupported_format",
            ErrorCode::CorruptFile => "corrupt_file",
            ErrorCode::Timeout => "timeout",
            ErrorCode::IoError => "io_error",
            ErrorCode::Internal => "internal",
        }
    }
}

/// Application error carrying its taxonomy code
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{1}")]
    Coded(ErrorCode, String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        AppError::Coded(ErrorCode::InvalidArgument, msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::Coded(ErrorCode::NotFound, msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Coded(ErrorCode::Conflict, msg.into())
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        AppError::Coded(ErrorCode::Busy, msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        AppError::Coded(ErrorCode::Timeout, msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Coded(ErrorCode::Internal, msg.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Coded(code, _) => *code,
            AppError::Io(_) => ErrorCode::IoError,
            AppError::Other(_) => ErrorCode::Internal,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let message = self.to_string();

        if code.http_status().is_server_error() {
            tracing::error!(code = code.as_str(), %message, "request failed");
        }

        let body = Json(json!({
            "error": {
                "code": code.as_str(),
                "message": message,
                "details": null,
            }
        }));

        (code.http_status(), body).into_response()
    }
}

/// Result type for API handlers and services
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::Busy.http_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::Timeout.http_status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ErrorCode::UnsupportedFormat.http_status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            ErrorCode::CorruptFile.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_code_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCode::UnsupportedFormat).unwrap();
        assert_eq!(json, "\"unsupported_format\"");
    }

    #[test]
    fn test_io_error_code() {
        let err = AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(err.code(), ErrorCode::IoError);
    }
}
