//! Worker pool admin surface: liveness snapshot and per-worker restart.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::workers::Liveness;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(liveness)).route("/:id/restart", post(restart))
}

#[derive(Serialize)]
struct WorkerStatus {
    id: usize,
    #[serde(flatten)]
    liveness: Liveness,
}

async fn liveness(State(state): State<AppState>) -> Json<Vec<WorkerStatus>> {
    let mut out: Vec<WorkerStatus> = state.workers.liveness().await.into_iter().map(|(id, liveness)| WorkerStatus { id, liveness }).collect();
    out.sort_by_key(|w| w.id);
    Json(out)
}

async fn restart(State(state): State<AppState>, Path(id): Path<usize>) -> CoreResult<Json<serde_json::Value>> {
    if state.workers.restart_worker(id).await {
        Ok(Json(serde_json::json!({"status": "restarted"})))
    } else {
        Err(CoreError::conflict(format!("worker {id} is not in an error state")))
    }
}
