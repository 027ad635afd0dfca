// content-gateway-rs/src/main.rs
// Content Gateway - HTTP entry point for the VirtualEd frontend
// Port 8080 by default (PORT or GATEWAY_SERVICE_PORT to override)
//
// Serves:
// - the static frontend from STATIC_DIR
// - GET /api/master-csv from the tiered dataset cache
// - POST /api/chat through the retrying completion client

use std::sync::Arc;

use content_gateway::{ContentGateway, GatewayConfig, SERVICE_NAME};
use tracing_subscriber::EnvFilter;
use upstream_sdk::config::{CompletionConfig, DatasetConfig, DEFAULT_PROVIDER};
use upstream_sdk::{RetryingCompletionClient, TieredDataCache};

const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    config_rs::load_env();

    let provider = &**DEFAULT_PROVIDER;

    let dataset_config = DatasetConfig::from_provider(provider)?;
    tracing::info!(
        remote_url = %dataset_config.remote_url,
        local_path = %dataset_config.local_path,
        "Dataset tiers configured"
    );
    let dataset = Arc::new(TieredDataCache::from_config(&dataset_config)?);

    let completion = match CompletionConfig::from_provider(provider) {
        Ok(config) => Some(Arc::new(RetryingCompletionClient::from_config(&config)?)),
        Err(err) => {
            tracing::warn!(error = %err, "Chat disabled: completion client not configured");
            None
        }
    };

    let gateway_config = GatewayConfig::from_provider(provider);
    tracing::info!(static_dir = %gateway_config.static_dir, "Serving frontend");

    // Load the dataset in the background so the port opens immediately.
    let warm_cache = Arc::clone(&dataset);
    tokio::spawn(async move { warm_cache.warm().await });

    let gateway = Arc::new(ContentGateway::new(dataset, completion, gateway_config));
    let app = gateway.create_router();

    let addr = config_rs::get_bind_address("GATEWAY", DEFAULT_PORT);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(%addr, service = SERVICE_NAME, "Content gateway listening");

    axum::serve(listener, app).await?;

    Ok(())
}
