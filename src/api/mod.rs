//! REST API server module
//!
//! Exposes job control and monitoring over HTTP: starting and pausing
//! ingestion jobs, reading their progress, channel counters and a live event
//! stream.

use crate::{Config, IngestEngine, Result};
use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// ## Jobs
/// - `POST /api/parse/start` - Create or resume a job and run it in the background
/// - `POST /api/parse/pause` - Pause a job
/// - `GET /api/parse/status/:job_id` - Job progress and timing
/// - `GET /api/parse/jobs/:channel` - Recent jobs of a channel
///
/// ## Counters
/// - `GET /api/stats/channel/:channel` - Stored post and media counters
/// - `GET /api/stats/proxies` - Proxy pool health
///
/// ## System
/// - `GET /api/health` - Database round trip
/// - `GET /api/openapi.json` - OpenAPI document
/// - `GET /api/events` - Server-sent job events
pub fn create_router(engine: Arc<IngestEngine>, config: Arc<Config>) -> Router {
    let state = AppState::new(engine, config.clone());

    let router = Router::new()
        // Jobs
        .route("/api/parse/start", post(routes::start_job))
        .route("/api/parse/pause", post(routes::pause_job))
        .route("/api/parse/status/:job_id", get(routes::job_status))
        .route("/api/parse/jobs/:channel", get(routes::list_channel_jobs))
        // Counters
        .route("/api/stats/channel/:channel", get(routes::channel_stats))
        .route("/api/stats/proxies", get(routes::proxy_stats))
        // System
        .route("/api/health", get(routes::health_check))
        .route("/api/openapi.json", get(routes::openapi_spec))
        .route("/api/events", get(routes::event_stream))
        .with_state(state);

    let router = if config.api.api_key.is_some() {
        router.layer(middleware::from_fn_with_state(
            config.api.api_key.clone(),
            auth::require_api_key,
        ))
    } else {
        router
    };

    let router = router.layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        router.layer(build_cors_layer(&config.api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer for the configured origins (`"*"` allows any)
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on `config.api.bind_address`
///
/// Runs until the listener fails.
///
/// ```no_run
/// use channel_ingest::IngestEngine;
/// use std::sync::Arc;
///
/// # async fn example(engine: IngestEngine) -> channel_ingest::Result<()> {
/// let config = engine.get_config();
/// channel_ingest::api::start_api_server(Arc::new(engine), config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(engine: Arc<IngestEngine>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;
    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(engine, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
