//! Archive read/append/remove, scoped to a preset's configured archive
//! file.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:preset", get(read))
        .route("/:preset/append", post(append))
        .route("/:preset/remove", post(remove))
}

fn resolve_path(state: &AppState, preset_name: &str) -> CoreResult<std::path::PathBuf> {
    let preset = state
        .store
        .get_preset(preset_name)?
        .ok_or_else(|| CoreError::not_found(format!("preset {preset_name} not found")))?;
    if preset.download_archive.is_empty() {
        return Err(CoreError::validation(format!("preset {preset_name} has no archive file configured")));
    }
    Ok(state.config.paths.config_path.join(preset.download_archive))
}

#[derive(Serialize)]
struct ReadResponse {
    file: String,
    items: Vec<String>,
}

async fn read(State(state): State<AppState>, Path(preset_name): Path<String>) -> CoreResult<Json<ReadResponse>> {
    let path = resolve_path(&state, &preset_name)?;
    let items = state.archive.read(&path).await?;
    Ok(Json(ReadResponse { file: path.to_string_lossy().to_string(), items }))
}

#[derive(Deserialize)]
struct MutateBody {
    items: Vec<String>,
    #[serde(default)]
    skip_check: bool,
}

#[derive(Serialize)]
struct MutateResponse {
    file: String,
    status: &'static str,
    added: Vec<String>,
}

async fn append(State(state): State<AppState>, Path(preset_name): Path<String>, Json(body): Json<MutateBody>) -> CoreResult<Json<MutateResponse>> {
    let path = resolve_path(&state, &preset_name)?;
    let added = state.archive.append(&path, &body.items, body.skip_check).await?;
    Ok(Json(MutateResponse { file: path.to_string_lossy().to_string(), status: "ok", added }))
}

#[derive(Deserialize)]
struct RemoveBody {
    items: Vec<String>,
}

#[derive(Serialize)]
struct RemoveResponse {
    file: String,
    status: &'static str,
    removed: Vec<String>,
}

async fn remove(State(state): State<AppState>, Path(preset_name): Path<String>, Json(body): Json<RemoveBody>) -> CoreResult<Json<RemoveResponse>> {
    let path = resolve_path(&state, &preset_name)?;
    let removed = state.archive.remove(&path, &body.items).await?;
    Ok(Json(RemoveResponse { file: path.to_string_lossy().to_string(), status: "ok", removed }))
}
