//! VirtualEd content gateway
//!
//! HTTP front for the static frontend, the published dataset and the chat
//! assistant. The dataset comes from a `TieredDataCache` and chat replies
//! from a `RetryingCompletionClient`; this crate only translates their
//! results into HTTP.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use upstream_sdk::config::{ConfigProvider, ConfigProviderExt};
use upstream_sdk::{ChatTurn, Provenance, RetryingCompletionClient, TieredDataCache};

pub mod error;

pub use error::{ErrorResponse, GatewayError};

pub const SERVICE_NAME: &str = "content-gateway";

pub const DEFAULT_STATIC_DIR: &str = "public";

/// Default request body limit (1MB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

pub const DEFAULT_CHAT_DIRECTIVE: &str = "You are VirtualEd, a patient and encouraging tutor. \
Stay in character, answer in plain language, keep replies short, and ask a follow-up question \
when the learner seems unsure.";

const X_DATA_PROVENANCE: HeaderName = HeaderName::from_static("x-data-provenance");
const X_DATA_STALE: HeaderName = HeaderName::from_static("x-data-stale");
const X_DATA_REFRESHED_AT: HeaderName = HeaderName::from_static("x-data-refreshed-at");

/// Gateway settings that are not owned by the upstream clients
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Directory served as the frontend
    pub static_dir: String,

    /// System directive pinned to the front of every chat
    pub chat_directive: String,

    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            static_dir: DEFAULT_STATIC_DIR.to_string(),
            chat_directive: DEFAULT_CHAT_DIRECTIVE.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl GatewayConfig {
    /// Keys: `static_dir`, `chat_system_directive`, `max_body_bytes`
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Self {
        Self {
            static_dir: provider.get_string_or("static_dir", DEFAULT_STATIC_DIR),
            chat_directive: provider.get_string_or("chat_system_directive", DEFAULT_CHAT_DIRECTIVE),
            max_body_bytes: provider.get_u64_or("max_body_bytes", DEFAULT_MAX_BODY_BYTES as u64) as usize,
        }
    }
}

/// Chat request body
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatTurn>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub service_name: String,
    pub status: String,
    pub dataset_ready: bool,
    pub dataset_provenance: Provenance,
    pub uptime_seconds: u64,
}

/// Core gateway state shared by all handlers
pub struct ContentGateway {
    dataset: Arc<TieredDataCache>,
    /// Absent when no API key is configured; chat then answers 503
    completion: Option<Arc<RetryingCompletionClient>>,
    config: GatewayConfig,
    started_at: Instant,
}

impl ContentGateway {
    pub fn new(
        dataset: Arc<TieredDataCache>,
        completion: Option<Arc<RetryingCompletionClient>>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            dataset,
            completion,
            config,
            started_at: Instant::now(),
        }
    }

    pub fn dataset(&self) -> &Arc<TieredDataCache> {
        &self.dataset
    }

    /// Create the Axum router with all routes and middleware
    pub fn create_router(self: Arc<Self>) -> Router {
        let static_files = ServeDir::new(&self.config.static_dir);
        let body_limit = RequestBodyLimitLayer::new(self.config.max_body_bytes);

        Router::new()
            .route("/health", get(Self::health_handler))
            .route("/api/master-csv", get(Self::master_csv_handler))
            .route("/api/chat", post(Self::chat_handler))
            .route("/api/*path", any(Self::api_not_found_handler))
            .fallback_service(static_files)
            .layer(body_limit)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
            .with_state(self)
    }

    async fn master_csv_handler(State(state): State<Arc<Self>>) -> Response {
        match state.dataset.resolve().await {
            Ok(resolution) => {
                let dataset = resolution.dataset;
                if resolution.stale {
                    info!(provenance = %dataset.provenance(), "Serving stale dataset");
                }

                (
                    StatusCode::OK,
                    [
                        (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                        (header::CACHE_CONTROL, "no-store".to_string()),
                        (X_DATA_PROVENANCE, dataset.provenance().to_string()),
                        (X_DATA_STALE, resolution.stale.to_string()),
                        (X_DATA_REFRESHED_AT, dataset.refreshed_at().to_rfc3339()),
                    ],
                    dataset.payload().to_owned(),
                )
                    .into_response()
            }
            Err(err) => {
                error!(error = %err, "No dataset available to serve");
                GatewayError::DatasetUnavailable.into_response()
            }
        }
    }

    async fn chat_handler(
        State(state): State<Arc<Self>>,
        payload: Result<Json<ChatRequest>, JsonRejection>,
    ) -> Result<Json<ChatResponse>, GatewayError> {
        let Json(request) = payload.map_err(|rejection| GatewayError::InvalidRequest(rejection.body_text()))?;

        if request.messages.is_empty() {
            return Err(GatewayError::InvalidRequest("messages must not be empty".to_string()));
        }

        let client = state.completion.as_ref().ok_or(GatewayError::ChatNotConfigured)?;

        match client
            .complete(&state.config.chat_directive, &request.messages, client.limits())
            .await
        {
            Ok(reply) => Ok(Json(ChatResponse { reply })),
            Err(err) if err.is_fatal() => {
                error!(
                    error = %err,
                    status = ?err.status_code(),
                    "Completion rejected by upstream"
                );
                Err(GatewayError::ChatRejected)
            }
            Err(err) => {
                warn!(error = %err, attempts = err.attempts(), "Completion retries exhausted");
                Err(GatewayError::ChatBusy)
            }
        }
    }

    async fn health_handler(State(state): State<Arc<Self>>) -> (StatusCode, Json<HealthResponse>) {
        let ready = state.dataset.has_ever_succeeded();
        let (status, code) = if ready {
            ("SERVING", StatusCode::OK)
        } else {
            ("DEGRADED", StatusCode::SERVICE_UNAVAILABLE)
        };

        (
            code,
            Json(HealthResponse {
                healthy: ready,
                service_name: SERVICE_NAME.to_string(),
                status: status.to_string(),
                dataset_ready: ready,
                dataset_provenance: state.dataset.provenance(),
                uptime_seconds: state.started_at.elapsed().as_secs(),
            }),
        )
    }

    async fn api_not_found_handler(uri: Uri) -> GatewayError {
        GatewayError::NotFound(uri.path().to_string())
    }
}

#[cfg(test)]
mod tests;
