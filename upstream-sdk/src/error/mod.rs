//! Error handling for the upstream access layer
//!
//! This module provides:
//! - `ServiceError`, the normalized error for a single upstream attempt
//! - `ErrorClass`, the retryable/fatal split the retry policy consumes
//! - `DatasetError` and `CompletionError`, the terminal errors the two
//!   components surface once their fallback or retry chain is exhausted

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

pub mod mapping;

/// Result type for single upstream operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Whether a failed attempt is worth repeating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient: rate limited, overloaded, unavailable, timed out
    Retryable,
    /// Guaranteed to fail again: bad input, bad credentials, not found
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Retryable => write!(f, "retryable"),
            ErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// Normalized error for one upstream attempt
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Network or connection errors
    #[error("Network error: {0}")]
    Network(String),

    /// The attempt did not settle within its deadline
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Upstream asked us to slow down (429)
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Upstream overloaded or down (5xx)
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    /// Invalid or missing credentials (401)
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Credentials lack permission (403)
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Malformed request (400 and other 4xx)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource or model not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Response body could not be decoded
    #[error("Parsing error: {0}")]
    Parsing(String),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Local filesystem errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Errors with additional context
    #[error("{inner}")]
    WithContext {
        inner: Box<ServiceError>,
        context: ErrorContext,
    },
}

impl ServiceError {
    pub fn network(message: impl Into<String>) -> Self {
        ServiceError::Network(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        ServiceError::Timeout(message.into())
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        ServiceError::RateLimit(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        ServiceError::Unavailable(message.into())
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        ServiceError::Authentication(message.into())
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        ServiceError::Authorization(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }

    pub fn parsing(message: impl Into<String>) -> Self {
        ServiceError::Parsing(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ServiceError::Configuration(message.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        ServiceError::Io(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ServiceError::Internal(message.into())
    }

    /// Add context to an existing error
    pub fn with_context(self, context: ErrorContext) -> Self {
        ServiceError::WithContext {
            inner: Box::new(self),
            context,
        }
    }

    /// Add a single context key/value to an existing error
    pub fn with_context_value(self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        let mut context = ErrorContext::new();
        context.add(key, value);
        self.with_context(context)
    }

    /// The error with all context layers peeled off
    pub fn root(&self) -> &ServiceError {
        match self {
            ServiceError::WithContext { inner, .. } => inner.root(),
            other => other,
        }
    }

    /// Get the upstream error code if available
    pub fn error_code(&self) -> Option<&str> {
        match self {
            ServiceError::WithContext { context, inner } => {
                context.error_code.as_deref().or_else(|| inner.error_code())
            }
            _ => None,
        }
    }

    /// Get the service name if available
    pub fn service_name(&self) -> Option<&str> {
        match self {
            ServiceError::WithContext { context, .. } => Some(&context.service),
            _ => None,
        }
    }

    /// Get the HTTP status code if available
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ServiceError::WithContext { context, inner } => {
                context.status_code.or_else(|| inner.status_code())
            }
            _ => None,
        }
    }

    /// Retryable vs fatal, as consumed by the retry policy
    pub fn class(&self) -> ErrorClass {
        match self.root() {
            ServiceError::Network(_)
            | ServiceError::Timeout(_)
            | ServiceError::RateLimit(_)
            | ServiceError::Unavailable(_) => ErrorClass::Retryable,
            _ => ErrorClass::Fatal,
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

/// Error context information
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Service that generated the error
    pub service: String,

    /// When the error was observed
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,

    /// HTTP status code if applicable
    pub status_code: Option<u16>,

    /// Service-specific error code
    pub error_code: Option<String>,

    /// Endpoint that was called
    pub endpoint: Option<String>,

    /// Additional context data
    pub data: HashMap<String, String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            service: "unknown".to_string(),
            timestamp: Some(chrono::Utc::now()),
            status_code: None,
            error_code: None,
            endpoint: None,
            data: HashMap::new(),
        }
    }
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new error context for a specific service
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    pub fn status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Add a context value
    pub fn add<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: fmt::Display,
    {
        self.data.insert(key.into(), value.to_string());
    }
}

/// Convert reqwest errors to ServiceError
impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        let context = ErrorContext::for_service("http_client");

        let service_error = if err.is_timeout() {
            ServiceError::timeout(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            ServiceError::network(format!("Connection error: {}", err))
        } else if err.is_decode() {
            ServiceError::parsing(format!("Response decode error: {}", err))
        } else if err.is_builder() {
            ServiceError::validation(format!("Invalid request: {}", err))
        } else {
            ServiceError::network(format!("HTTP client error: {}", err))
        };

        match err.status() {
            Some(status) => service_error.with_context(context.status_code(status.as_u16())),
            None => service_error.with_context(context),
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::io(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::parsing(format!("JSON error: {}", err))
    }
}

/// Terminal failure of the dataset cache
#[derive(Error, Debug, Clone)]
pub enum DatasetError {
    /// Remote and local tiers both failed and nothing was ever cached
    #[error("No dataset available (remote: {remote}; local: {local})")]
    NoDataAvailable { remote: String, local: String },
}

/// Terminal failure of the completion client
#[derive(Debug)]
pub struct CompletionError {
    fatal: bool,
    exhausted: bool,
    attempts: u32,
    source: ServiceError,
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.fatal { "fatal" } else { "retries exhausted" };
        write!(
            f,
            "Completion failed after {} attempt(s) ({}): {}",
            self.attempts, mode, self.source
        )
    }
}

impl std::error::Error for CompletionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl CompletionError {
    pub fn fatal(source: ServiceError, attempts: u32) -> Self {
        Self {
            fatal: true,
            exhausted: false,
            attempts,
            source,
        }
    }

    pub fn exhausted(source: ServiceError, attempts: u32) -> Self {
        Self {
            fatal: false,
            exhausted: true,
            attempts,
            source,
        }
    }

    /// Non-retryable upstream rejection
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Every attempt failed on a transient class
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// HTTP status of the last upstream failure, if it had one
    pub fn status_code(&self) -> Option<u16> {
        self.source.status_code()
    }

    pub fn last_error(&self) -> &ServiceError {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_looks_through_context() {
        let err = ServiceError::rate_limit("slow down")
            .with_context(ErrorContext::for_service("openai").status_code(429));
        assert_eq!(err.class(), ErrorClass::Retryable);
        assert_eq!(err.status_code(), Some(429));
        assert_eq!(err.service_name(), Some("openai"));

        let err = ServiceError::authentication("bad key").with_context_value("attempt", 1);
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert!(matches!(err.root(), ServiceError::Authentication(_)));
    }

    #[test]
    fn test_completion_error_flags() {
        let err = CompletionError::fatal(ServiceError::validation("bad"), 1);
        assert!(err.is_fatal());
        assert!(!err.is_exhausted());
        assert!(err.to_string().contains("fatal"));

        let err = CompletionError::exhausted(ServiceError::unavailable("503"), 3);
        assert!(!err.is_fatal());
        assert!(err.is_exhausted());
        assert_eq!(err.attempts(), 3);
        assert!(err.to_string().contains("retries exhausted"));
    }
}
