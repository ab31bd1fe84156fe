//! Notification target CRUD. Delivery itself is out of scope here; this
//! core only persists targets and emits the `config_update` event an
//! external webhook dispatcher listens for.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;

use crate::db::models::{NotificationTarget, NotificationTargetSpec};
use crate::error::CoreResult;
use crate::events::{Event, EventKind};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list).post(create)).route("/:id", get(get_one).delete(delete))
}

async fn list(State(state): State<AppState>) -> CoreResult<Json<Vec<NotificationTarget>>> {
    Ok(Json(state.store.list_notifications()?))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<i64>) -> CoreResult<Json<NotificationTarget>> {
    state
        .store
        .list_notifications()?
        .into_iter()
        .find(|n| n.id == id)
        .map(Json)
        .ok_or_else(|| crate::error::CoreError::not_found(format!("notification target {id} not found")))
}

async fn create(State(state): State<AppState>, Json(spec): Json<NotificationTargetSpec>) -> CoreResult<Json<NotificationTarget>> {
    let target = state.store.create_notification(spec)?;
    state.events.publish(Event::new(EventKind::ConfigUpdate, serde_json::json!({"table": "notifications", "action": "created"}))).await;
    Ok(Json(target))
}

async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> CoreResult<Json<Value>> {
    state.store.delete_notification(id)?;
    state.events.publish(Event::new(EventKind::ConfigUpdate, serde_json::json!({"table": "notifications", "action": "deleted"}))).await;
    Ok(Json(serde_json::json!({"status": "deleted"})))
}
