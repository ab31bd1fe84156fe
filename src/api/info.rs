//! Metadata extraction preview.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStatus;
use crate::error::CoreResult;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_info))
}

#[derive(Deserialize)]
struct InfoQuery {
    url: String,
    #[serde(default)]
    preset: String,
    #[serde(default)]
    cli: String,
    #[serde(default)]
    force: bool,
}

#[derive(Serialize)]
struct InfoResponse {
    #[serde(flatten)]
    info: Value,
    cache: CacheStatus,
}

async fn get_info(State(state): State<AppState>, Query(q): Query<InfoQuery>) -> CoreResult<Json<InfoResponse>> {
    // The API surface has no long-lived cancellation context of its own;
    // a fresh token means "uncancelled for the duration of this call",
    // which is what an HTTP request/response cycle needs.
    let shutdown = CancellationToken::new();
    let (info, cache) = state.driver.get_info(&q.url, &q.preset, &q.cli, q.force, &shutdown).await?;
    Ok(Json(InfoResponse { info, cache }))
}
