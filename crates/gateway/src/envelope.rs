//! Uniform API error envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use opsmith_core::Error;

/// Error body: `{success:false, error:{code,message,details?}, timestamp,
/// requestId}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    success: bool,
    error: ErrorDetail,
    timestamp: String,
    request_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// API-level error with a stable code and HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn persona_not_found(id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "PERSONA_NOT_FOUND",
            format!("persona '{}' not found", id),
        )
    }

    pub fn channel_not_found(id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "CHANNEL_NOT_FOUND",
            format!("channel '{}' not found", id),
        )
    }

    pub fn platform_not_supported(platform: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "PLATFORM_NOT_SUPPORTED",
            format!("platform '{}' is not supported", platform),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        match &error {
            Error::Validation(msg) => Self::validation(msg.clone()),
            Error::NotFound(msg) => Self::not_found(msg.clone()),
            Error::Conflict(msg) => Self::new(StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            Error::PolicyDenied(msg) => {
                Self::new(StatusCode::FORBIDDEN, "POLICY_DENIED", msg.clone())
            }
            Error::LlmUnavailable(msg) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "LLM_UNAVAILABLE",
                msg.clone(),
            ),
            Error::ExecutionFailed(msg) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "EXECUTION_FAILED",
                msg.clone(),
            ),
            _ => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                error.to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::new_v4().to_string();
        if self.status.is_server_error() {
            tracing::error!(code = self.code, message = %self.message, request_id = %request_id, "Request failed");
        } else {
            tracing::debug!(code = self.code, message = %self.message, request_id = %request_id, "Request rejected");
        }
        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
                details: self.details,
            },
            timestamp: Utc::now().to_rfc3339(),
            request_id,
        };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
