//! Optional API key check for the REST API
//!
//! When `ApiConfig::api_key` is set every request must carry the same value in
//! the `X-Api-Key` header, otherwise it is answered with 401.

use crate::error::ApiError;
use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Middleware rejecting requests without the configured API key
///
/// ```no_run
/// use axum::{Router, middleware};
/// use channel_ingest::api::auth::require_api_key;
///
/// let router: Router = Router::new().layer(middleware::from_fn_with_state(
///     Some("secret".to_string()),
///     require_api_key,
/// ));
/// ```
pub async fn require_api_key(
    State(expected): State<Option<String>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(key) if keys_match(key.as_bytes(), expected.as_bytes()) => next.run(request).await,
        Some(_) => unauthorized("Invalid API key"),
        None => unauthorized("Missing X-Api-Key header"),
    }
}

/// Length check plus a full XOR fold, so equal-length keys take the same time
fn keys_match(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ApiError::unauthorized(message))).into_response()
}
