//! Collection Store
//!
//! Persists posts, polls, categories, highlights, channels, live links and keywords as whole
//! JSON documents on object storage, mutated through a per-collection action protocol.

mod api;
mod auth;
mod config;
mod errors;
mod models;
mod storage;
mod store;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use store::{CollectionRepository, Dispatcher};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Dispatcher>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Collection Store");
    tracing::info!("Storage provider: {}", config.storage.provider_name());
    tracing::info!("Concurrency mode: {:?}", config.concurrency);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (STORE_API_PSK). Mutations are unauthenticated!");
    }
    if matches!(config.storage, config::StorageConfig::Memory) {
        tracing::warn!("No object storage configured; collections live in memory only");
    }

    // Initialize storage backend
    let backend =
        storage::build_backend(&config.storage, config.concurrency, config.request_timeout)?;
    let repo = CollectionRepository::new(backend, config.concurrency);

    // Create application state
    let state = AppState {
        store: Arc::new(Dispatcher::new(repo)),
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    // Mutations and storage administration
    let protected_routes = Router::new()
        .route("/collections/{kind}/manage", post(api::manage_collection))
        .route("/storage", get(api::storage_status))
        .route("/storage/objects", get(api::list_objects))
        .layer(middleware::from_fn(move |req, next| {
            auth::require_psk(psk.clone(), req, next)
        }));

    // Reads are public
    let public_routes = Router::new().route("/collections/{kind}", get(api::list_records));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", protected_routes.merge(public_routes))
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
