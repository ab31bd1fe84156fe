//! Preset CRUD. Default presets are read-only; the store layer enforces
//! that (`patch`/`delete` on a `default=true` row returns `Conflict`), this
//! module just surfaces it.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;

use crate::db::models::{Preset, PresetSpec};
use crate::error::CoreResult;
use crate::events::{Event, EventKind};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:name", get(get_one).patch(patch).put(patch).delete(delete))
}

async fn list(State(state): State<AppState>) -> CoreResult<Json<Vec<Preset>>> {
    Ok(Json(state.store.list_presets()?))
}

async fn get_one(State(state): State<AppState>, Path(name): Path<String>) -> CoreResult<Json<Preset>> {
    state.store.get_preset(&name)?.map(Json).ok_or_else(|| crate::error::CoreError::not_found(format!("preset {name} not found")))
}

async fn create(State(state): State<AppState>, Json(spec): Json<PresetSpec>) -> CoreResult<Json<Preset>> {
    let preset = state.store.create_preset(spec)?;
    publish_config_update(&state, "created").await;
    Ok(Json(preset))
}

async fn patch(State(state): State<AppState>, Path(name): Path<String>, Json(spec): Json<PresetSpec>) -> CoreResult<Json<Preset>> {
    let preset = state.store.patch_preset(&name, spec)?;
    publish_config_update(&state, "updated").await;
    Ok(Json(preset))
}

async fn delete(State(state): State<AppState>, Path(name): Path<String>) -> CoreResult<Json<Value>> {
    state.store.delete_preset(&name)?;
    publish_config_update(&state, "deleted").await;
    Ok(Json(serde_json::json!({"status": "deleted"})))
}

async fn publish_config_update(state: &AppState, action: &str) {
    state.events.publish(Event::new(EventKind::ConfigUpdate, serde_json::json!({"table": "presets", "action": action}))).await;
}
