//! Gateway error responses
//!
//! Every `/api` failure is rendered as `{"error": ..., "code": ...}`. Messages
//! are written for end users; upstream detail goes to the log only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("The dataset is temporarily unavailable. Please try again later.")]
    DatasetUnavailable,

    /// Upstream rejected the request in a way retrying cannot fix
    #[error("The assistant could not process this request.")]
    ChatRejected,

    #[error("The assistant is busy right now. Please try again in a moment.")]
    ChatBusy,

    #[error("Chat is not configured on this server.")]
    ChatNotConfigured,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No route for {0}")]
    NotFound(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::DatasetUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ChatRejected => StatusCode::BAD_GATEWAY,
            Self::ChatBusy => StatusCode::SERVICE_UNAVAILABLE,
            Self::ChatNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Convert to HTTP status code and error body
    pub fn to_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        let status = self.status();
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                code: status.as_u16(),
            }),
        )
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.to_response().into_response()
    }
}
