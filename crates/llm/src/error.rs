use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::messages::anthropic;

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Why an account could not be leased from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// The request was cancelled while waiting.
    #[error("request cancelled while waiting for an account")]
    Cancelled,

    /// The wait budget ran out before an account became available.
    #[error("timed out waiting for an available account")]
    Timeout,

    /// Every account was tried and none was usable.
    #[error("all accounts failed or are out of quota")]
    AllExhausted,
}

/// Gateway errors with appropriate HTTP status codes.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Malformed or invalid request body.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Client authentication failed (missing or unknown API key).
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested model is not configured.
    #[error("Model '{0}' not found")]
    ModelNotFound(String),

    /// No upstream account could be leased within the request budget.
    #[error("No upstream account available: {0}")]
    AccountAcquire(#[from] AcquireError),

    /// Upstream rejected the JWT. Triggers one in-place refresh and retry
    /// before it surfaces.
    #[error("Upstream authentication failed: {0}")]
    UpstreamAuth(String),

    /// Upstream reported the account's quota as exhausted (status 477).
    #[error("Upstream quota exhausted: {0}")]
    UpstreamQuota(String),

    /// Any other non-2xx upstream response.
    #[error("Upstream API error ({status}): {message}")]
    UpstreamApi { status: u16, message: String },

    /// The upstream response could not be decoded.
    #[error("Failed to parse upstream response: {0}")]
    UpstreamParse(String),

    /// Network or connection error talking to upstream.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Internal server error.
    /// If Some(message), the detail is safe to show; if None, it is not.
    #[error("Internal server error")]
    InternalError(Option<String>),
}

impl LlmError {
    /// Get the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::ModelNotFound(_) => StatusCode::NOT_FOUND,
            Self::AccountAcquire(_) | Self::UpstreamQuota(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamAuth(_)
            | Self::UpstreamApi { .. }
            | Self::UpstreamParse(_)
            | Self::ConnectionError(_)
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error type string for the OpenAI-shaped response body.
    pub fn error_type(&self) -> &str {
        match self {
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::AuthenticationFailed(_) => "authentication_error",
            Self::ModelNotFound(_) => "not_found_error",
            Self::AccountAcquire(_) | Self::UpstreamQuota(_) => "rate_limit_error",
            Self::UpstreamAuth(_)
            | Self::UpstreamApi { .. }
            | Self::UpstreamParse(_)
            | Self::ConnectionError(_) => "api_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Error type string for the Anthropic-shaped response body.
    pub fn anthropic_error_type(&self) -> &str {
        match self {
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::AuthenticationFailed(_) => "authentication_error",
            Self::ModelNotFound(_) => "model_not_found_error",
            Self::AccountAcquire(_) | Self::UpstreamQuota(_) => "rate_limit_error",
            _ => "api_error",
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::InternalError(Some(detail)) => detail.clone(),
            Self::InternalError(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Error response format compatible with the OpenAI API.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    code: u16,
}

impl IntoResponse for LlmError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = ErrorResponse {
            error: ErrorDetails {
                message: self.client_message(),
                r#type: self.error_type().to_string(),
                code: status.as_u16(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<LlmError> for anthropic::ErrorResponse {
    fn from(error: LlmError) -> Self {
        Self {
            error_type: "error".to_string(),
            error: anthropic::AnthropicErrorDetails {
                error_type: error.anthropic_error_type().to_string(),
                message: error.client_message(),
            },
        }
    }
}

/// Anthropic-shaped error carrier for the `/v1/messages` handlers.
pub struct AnthropicErrorResponse {
    status: StatusCode,
    body: anthropic::ErrorResponse,
}

impl From<LlmError> for AnthropicErrorResponse {
    fn from(error: LlmError) -> Self {
        let status = error.status_code();
        let body = anthropic::ErrorResponse::from(error);

        Self { status, body }
    }
}

impl IntoResponse for AnthropicErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type AnthropicResult<T> = std::result::Result<T, AnthropicErrorResponse>;
