//! Error mapping for upstream HTTP responses
//!
//! Converts a non-2xx response from the dataset store or the completion
//! API into a normalized `ServiceError`.

use reqwest::StatusCode;
use serde_json::Value;

use super::{ErrorContext, ServiceError};

/// Longest slice of a raw body carried into an error message
const MAX_BODY_EXCERPT: usize = 100;

/// Map a status code and an already-extracted message to a ServiceError
fn map_status(status: StatusCode, message: String) -> ServiceError {
    match status.as_u16() {
        400 | 422 => ServiceError::validation(message),
        401 => ServiceError::authentication(message),
        403 => ServiceError::authorization(message),
        404 => ServiceError::not_found(message),
        408 => ServiceError::timeout(message),
        429 => ServiceError::rate_limit(message),
        500..=599 => ServiceError::unavailable(message),
        400..=499 => ServiceError::validation(message),
        _ => ServiceError::unavailable(message),
    }
}

/// Map an OpenAI-style `{"error": {...}}` envelope
fn map_error_envelope(status: StatusCode, error: &Value, context: &mut ErrorContext) -> ServiceError {
    if let Some(error_type) = error.get("type").and_then(|t| t.as_str()) {
        context.add("error_type", error_type);
    }

    if let Some(code) = error.get("code").and_then(|c| c.as_str()) {
        context.error_code = Some(code.to_string());
    }

    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("Unknown upstream error");

    map_status(status, message.to_string())
}

/// Map a generic HTTP error to a ServiceError
///
/// The returned error is bare; callers attach `context` once the mapping
/// has filled in whatever the body revealed.
pub fn map_http_error(status: StatusCode, body: &str, context: &mut ErrorContext) -> ServiceError {
    context.status_code = Some(status.as_u16());

    if let Ok(json) = serde_json::from_str::<Value>(body) {
        match json.get("error") {
            Some(error @ Value::Object(_)) => return map_error_envelope(status, error, context),
            Some(Value::String(message)) => return map_status(status, message.clone()),
            _ => {}
        }

        if let Some(message) = json.get("message").and_then(|m| m.as_str()) {
            return map_status(status, message.to_string());
        }
    }

    // Fallback to status-based mapping
    let body = body.trim();
    let message = if body.is_empty() {
        status.to_string()
    } else if body.chars().count() > MAX_BODY_EXCERPT {
        let excerpt: String = body.chars().take(MAX_BODY_EXCERPT).collect();
        format!("{}: {}...", status, excerpt)
    } else {
        format!("{}: {}", status, body)
    };

    map_status(status, message)
}

/// Helper function to classify HTTP errors by category
pub fn classify_http_error(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 | 422 => "validation",
        401 => "authentication",
        403 => "authorization",
        404 => "not_found",
        408 => "timeout",
        429 => "rate_limit",
        500..=599 => "server",
        400..=499 => "client",
        _ => "unknown",
    }
}

/// Determine if an HTTP status code indicates a retryable error
pub fn is_retryable_status(status: StatusCode) -> bool {
    map_status(status, String::new()).is_retryable()
}
