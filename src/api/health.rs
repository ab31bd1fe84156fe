//! Liveness probe for the wrapping executable / container orchestrator.
//! Kept minimal on purpose.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    workers_busy: usize,
    workers_total: usize,
    queue_paused: bool,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        workers_busy: state.workers.busy_count().await,
        workers_total: state.workers.size(),
        queue_paused: state.queue.is_paused(),
    })
}
