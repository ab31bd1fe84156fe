//! Task CRUD plus the scheduler-adjacent operations: `task_mark_all`/
//! `task_unmark_all` and the `inspect` dry-run of a `UrlSource`.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use crate::db::models::{Task, TaskSpec};
use crate::error::CoreResult;
use crate::events::{Event, EventKind};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/inspect", get(inspect))
        .route("/:id", get(get_one).patch(patch).put(patch).delete(delete))
        .route("/:id/mark-all", axum::routing::post(mark_all))
        .route("/:id/unmark-all", axum::routing::post(unmark_all))
}

async fn list(State(state): State<AppState>) -> CoreResult<Json<Vec<Task>>> {
    Ok(Json(state.store.list_tasks()?))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<i64>) -> CoreResult<Json<Task>> {
    state
        .store
        .list_tasks()?
        .into_iter()
        .find(|t| t.id == id)
        .map(Json)
        .ok_or_else(|| crate::error::CoreError::not_found(format!("task {id} not found")))
}

async fn create(State(state): State<AppState>, Json(spec): Json<TaskSpec>) -> CoreResult<Json<Task>> {
    let task = state.store.create_task(spec)?;
    publish_config_update(&state, "created").await;
    Ok(Json(task))
}

async fn patch(State(state): State<AppState>, Path(id): Path<i64>, Json(spec): Json<TaskSpec>) -> CoreResult<Json<Task>> {
    let task = state.store.patch_task(id, spec)?;
    publish_config_update(&state, "updated").await;
    Ok(Json(task))
}

async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> CoreResult<Json<Value>> {
    state.store.delete_task(id)?;
    publish_config_update(&state, "deleted").await;
    Ok(Json(serde_json::json!({"status": "deleted"})))
}

async fn mark_all(State(state): State<AppState>, Path(id): Path<i64>) -> CoreResult<Json<Value>> {
    let marked = state.scheduler.mark_all(id).await?;
    Ok(Json(serde_json::json!({"status": "ok", "marked": marked})))
}

async fn unmark_all(State(state): State<AppState>, Path(id): Path<i64>) -> CoreResult<Json<Value>> {
    let unmarked = state.scheduler.unmark_all(id).await?;
    Ok(Json(serde_json::json!({"status": "ok", "unmarked": unmarked})))
}

#[derive(Deserialize)]
struct InspectQuery {
    url: String,
    #[serde(default)]
    handler: Option<String>,
    #[serde(default)]
    static_only: bool,
}

#[derive(serde::Serialize)]
struct InspectResponse {
    matched: bool,
    handler: Option<String>,
    supported: bool,
    items: Option<Vec<crate::sources::Candidate>>,
}

async fn inspect(State(state): State<AppState>, Query(q): Query<InspectQuery>) -> CoreResult<Json<InspectResponse>> {
    let source = match &q.handler {
        Some(name) => state.sources.by_name(name),
        None => state.sources.resolve(&q.url),
    };
    let Some(source) = source else {
        return Ok(Json(InspectResponse { matched: false, handler: None, supported: false, items: None }));
    };
    let supported = source.supports_manual_inspection();
    let items = if q.static_only || !supported {
        None
    } else {
        Some(source.enumerate(&q.url).await?)
    };
    Ok(Json(InspectResponse { matched: true, handler: Some(source.name().to_string()), supported, items }))
}

async fn publish_config_update(state: &AppState, action: &str) {
    state.events.publish(Event::new(EventKind::ConfigUpdate, serde_json::json!({"table": "tasks", "action": action}))).await;
}
