//! Counter handlers.

use crate::api::AppState;
use crate::error::Result;
use crate::proxy::ProxyStats;
use crate::types::ChannelStats;
use axum::{
    Json,
    extract::{Path, State},
};

/// GET /stats/channel/:channel - Aggregate counters of a channel's stored posts
#[utoipa::path(
    get,
    path = "/api/stats/channel/{channel}",
    tag = "stats",
    params(("channel" = String, Path, description = "Channel")),
    responses(
        (status = 200, description = "Post and media counters", body = ChannelStats),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn channel_stats(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Json<ChannelStats>> {
    Ok(Json(state.engine.channel_stats(&channel).await?))
}

/// GET /stats/proxies - Proxy pool health
#[utoipa::path(
    get,
    path = "/api/stats/proxies",
    tag = "stats",
    responses(
        (status = 200, description = "Proxy counters", body = ProxyStats)
    )
)]
pub async fn proxy_stats(State(state): State<AppState>) -> Json<ProxyStats> {
    Json(state.engine.proxy_stats())
}
