//! JSON response envelope and the HTTP mapping of core errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use webshell_core::errors::SshError;

/// `{code, message, data, timestamp}` envelope used by every JSON route.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: &str, data: T) -> Json<Self> {
        Json(Self {
            code: StatusCode::OK.as_u16(),
            message: message.to_string(),
            data: Some(data),
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }
}

/// Errors returned by route handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ssh(#[from] SshError),

    /// Malformed request that never reached the core.
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Ssh(e) => match e {
                SshError::NotFound(_) => StatusCode::NOT_FOUND,
                SshError::Forbidden(_) => StatusCode::FORBIDDEN,
                SshError::InvalidArgument(_) | SshError::NoCredentials => StatusCode::BAD_REQUEST,
                SshError::PoolExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
                SshError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
                SshError::Transport(_) => StatusCode::BAD_GATEWAY,
                SshError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed with {status}: {self}");
        }
        let body = ApiResponse::<()> {
            code: status.as_u16(),
            message: self.to_string(),
            data: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        (status, Json(body)).into_response()
    }
}
