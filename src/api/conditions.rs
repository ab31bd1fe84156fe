//! Condition CRUD. Every mutation reloads the Download Driver's compiled
//! condition set so in-flight preparation sees the change immediately, and
//! publishes a `config_update` event.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;

use crate::db::models::{Condition, ConditionSpec};
use crate::error::CoreResult;
use crate::events::{Event, EventKind};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list).post(create)).route("/:id", get(get_one).patch(patch).put(patch).delete(delete))
}

async fn list(State(state): State<AppState>) -> CoreResult<Json<Vec<Condition>>> {
    Ok(Json(state.store.list_conditions()?))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<i64>) -> CoreResult<Json<Condition>> {
    state
        .store
        .list_conditions()?
        .into_iter()
        .find(|c| c.id == id)
        .map(Json)
        .ok_or_else(|| crate::error::CoreError::not_found(format!("condition {id} not found")))
}

async fn create(State(state): State<AppState>, Json(spec): Json<ConditionSpec>) -> CoreResult<Json<Condition>> {
    let condition = state.store.create_condition(spec)?;
    reload_and_publish(&state, "created").await?;
    Ok(Json(condition))
}

async fn patch(State(state): State<AppState>, Path(id): Path<i64>, Json(spec): Json<ConditionSpec>) -> CoreResult<Json<Condition>> {
    let condition = state.store.patch_condition(id, spec)?;
    reload_and_publish(&state, "updated").await?;
    Ok(Json(condition))
}

async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> CoreResult<Json<Value>> {
    state.store.delete_condition(id)?;
    reload_and_publish(&state, "deleted").await?;
    Ok(Json(serde_json::json!({"status": "deleted"})))
}

async fn reload_and_publish(state: &AppState, action: &str) -> CoreResult<()> {
    state.driver.reload_conditions().await?;
    state.events.publish(Event::new(EventKind::ConfigUpdate, serde_json::json!({"table": "conditions", "action": action}))).await;
    Ok(())
}
