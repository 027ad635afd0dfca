//! Common utilities for upstream clients

use std::fmt;
use std::time::Duration;

use reqwest::{header, Client};

use crate::error::{mapping::map_http_error, ErrorContext, Result, ServiceError};

/// UserAgent structure for identifying the client to upstream services
#[derive(Debug, Clone)]
pub struct UserAgent {
    pub app_name: String,
    pub version: String,
    pub extra: Option<String>,
}

impl Default for UserAgent {
    fn default() -> Self {
        Self {
            app_name: "VirtualEd".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            extra: Some("upstream-sdk".to_string()),
        }
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_name, self.version)?;

        if let Some(ref extra) = self.extra {
            write!(f, " ({})", extra)?;
        }

        Ok(())
    }
}

/// Build a standard HTTP client with default settings
///
/// `timeout` bounds each whole request; the retry layer adds its own
/// per-attempt deadline on top.
pub fn build_http_client(user_agent: Option<UserAgent>, timeout: Option<Duration>) -> Result<Client> {
    let mut headers = header::HeaderMap::new();
    let ua = user_agent.unwrap_or_default().to_string();

    headers.insert(
        header::USER_AGENT,
        header::HeaderValue::from_str(&ua)
            .map_err(|e| ServiceError::configuration(format!("Invalid user agent: {}", e)))?,
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout.unwrap_or_else(|| Duration::from_secs(30)))
        .gzip(true)
        .build()
        .map_err(|e| ServiceError::configuration(format!("Failed to build HTTP client: {}", e)))
}

/// Turn a non-2xx response into a ServiceError carrying status and endpoint
pub async fn parse_error_response(service_name: &str, endpoint: &str, response: reqwest::Response) -> ServiceError {
    let status = response.status();
    let mut context = ErrorContext::for_service(service_name).endpoint(endpoint);

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => format!("Failed to read error response: {}", e),
    };

    map_http_error(status, &body, &mut context).with_context(context)
}
