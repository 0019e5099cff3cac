//! System handlers: health, events, OpenAPI.

use crate::api::AppState;
use crate::types::Event;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// GET /health - Database round trip
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "system",
    responses(
        (status = 200, description = "Service and database are reachable"),
        (status = 503, description = "Database unreachable")
    )
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let timestamp = chrono::Utc::now().to_rfc3339();
    match state.engine.db.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": timestamp,
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                    "timestamp": timestamp,
                })),
            )
        }
    }
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/api/openapi.json",
    tag = "system",
    responses(
        (status = 200, description = "OpenAPI specification in JSON format")
    )
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    Json(ApiDoc::openapi())
}

/// GET /events - Server-sent job events
#[utoipa::path(
    get,
    path = "/api/events",
    tag = "system",
    responses(
        (status = 200, description = "Server-sent events stream (text/event-stream)", content_type = "text/event-stream")
    )
)]
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = BroadcastStream::new(state.engine.subscribe());

    let sse_stream = stream.filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(data) => Some(Ok(SseEvent::default().event(event_name(&event)).data(data))),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize event");
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "SSE client lagged");
            Some(Ok(SseEvent::default()
                .event("error")
                .data(json!({"error": "lagged", "skipped": skipped}).to_string())))
        }
    });

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}

/// SSE event name, matching the `type` tag of the JSON payload
pub(crate) fn event_name(event: &Event) -> &'static str {
    match event {
        Event::JobCreated { .. } => "job_created",
        Event::JobStarted { .. } => "job_started",
        Event::PageFetched { .. } => "page_fetched",
        Event::RateLimited { .. } => "rate_limited",
        Event::Progress { .. } => "progress",
        Event::JobPaused { .. } => "job_paused",
        Event::JobCompleted { .. } => "job_completed",
        Event::JobFailed { .. } => "job_failed",
        Event::Shutdown => "shutdown",
    }
}
