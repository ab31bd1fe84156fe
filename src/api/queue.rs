//! Queue and history operations.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::Table;
use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventKind};
use crate::queue::{validate_folder, Item, ItemSpec, OrderKey, Status};
use crate::AppState;

use super::MAX_PER_PAGE;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(add).get(list))
        .route("/batch", post(add_batch))
        .route("/cancel", post(cancel))
        .route("/pause", post(pause_items))
        .route("/start", post(start_items))
        .route("/delete", post(delete))
        .route("/pause-all", post(pause_all))
        .route("/resume-all", post(resume_all))
        .route("/snapshot", get(live_snapshot))
        .route("/:id", get(get_one))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default = "default_where")]
    r#where: Where,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_per_page")]
    per_page: u32,
}

fn default_where() -> Where {
    Where::Queue
}
fn default_page() -> u32 {
    1
}
fn default_per_page() -> u32 {
    50
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Where {
    Queue,
    Done,
}

#[derive(Serialize)]
struct Paged<T> {
    items: Vec<T>,
    total: u64,
    page: u32,
    per_page: u32,
}

async fn list(State(state): State<AppState>, Query(q): Query<ListQuery>) -> CoreResult<Json<Paged<Item>>> {
    let per_page = q.per_page.min(MAX_PER_PAGE).max(1);
    let page = q.page.max(1);
    match q.r#where {
        Where::Queue => {
            let mut items = state.queue.all().await;
            items.sort_by_key(|i| i.created_at);
            let total = items.len() as u64;
            let start = ((page - 1) * per_page) as usize;
            let page_items = items.into_iter().skip(start).take(per_page as usize).collect();
            Ok(Json(Paged { items: page_items, total, page, per_page }))
        }
        Where::Done => {
            let (items, total) = state.store.list_items(Table::History, page, per_page)?;
            Ok(Json(Paged { items, total, page, per_page }))
        }
    }
}

async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> CoreResult<Json<Item>> {
    if let Some(item) = state.queue.get(&id).await {
        return Ok(Json(item));
    }
    state
        .store
        .get_item(Table::History, &id)?
        .map(Json)
        .ok_or_else(|| CoreError::not_found(format!("item {id} not found")))
}

#[derive(Serialize)]
struct AddResult {
    status: &'static str,
    id: Option<String>,
    error: Option<String>,
}

async fn add(State(state): State<AppState>, Json(spec): Json<ItemSpec>) -> CoreResult<Json<AddResult>> {
    let item = admit(&state, spec).await?;
    Ok(Json(AddResult { status: "queued", id: Some(item.id), error: None }))
}

async fn add_batch(State(state): State<AppState>, Json(specs): Json<Vec<ItemSpec>>) -> Json<Vec<AddResult>> {
    let mut results = Vec::with_capacity(specs.len());
    for spec in specs {
        match admit(&state, spec).await {
            Ok(item) => results.push(AddResult { status: "queued", id: Some(item.id), error: None }),
            Err(e) => results.push(AddResult { status: "error", id: None, error: Some(e.message) }),
        }
    }
    Json(results)
}

async fn admit(state: &AppState, spec: ItemSpec) -> CoreResult<Item> {
    if spec.url.trim().is_empty() {
        return Err(CoreError::validation("url is required"));
    }
    if let Some(folder) = &spec.folder {
        validate_folder(folder).map_err(CoreError::validation)?;
    }
    if let Some(preset) = &spec.preset {
        if !preset.is_empty() && state.store.get_preset(preset)?.is_none() {
            return Err(CoreError::not_found(format!("preset {preset} not found")));
        }
    }
    let id = uuid::Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now();
    let item = Item::new(id, spec, created_at);
    state.store.insert_item(Table::Queue, &item)?;
    state.queue.add(item.clone(), OrderKey { created_at, sub_index: 0 }).await;
    state.queue.wake.notify_waiters();
    state
        .events
        .publish(Event::for_item(EventKind::ItemAdded, item.id.clone(), serde_json::to_value(&item).unwrap_or(Value::Null)))
        .await;
    Ok(item)
}

#[derive(Deserialize)]
struct IdsBody {
    ids: Vec<String>,
}

async fn cancel(State(state): State<AppState>, Json(body): Json<IdsBody>) -> Json<HashMap<String, String>> {
    let mut result = HashMap::new();
    for id in body.ids {
        let status = match state.queue.get(&id).await {
            None => "not_found".to_string(),
            Some(item) if item.status.is_terminal() => "already_cancelled".to_string(),
            Some(_) => {
                let _ = state.queue.update(&id, |it| it.status = Status::Cancelled).await;
                "cancelling".to_string()
            }
        };
        result.insert(id, status);
    }
    Json(result)
}

#[derive(Deserialize)]
struct StartPauseBody {
    ids: Vec<String>,
}

async fn pause_items(State(state): State<AppState>, Json(body): Json<StartPauseBody>) -> CoreResult<Json<HashMap<String, String>>> {
    let mut result = HashMap::new();
    for id in body.ids {
        match state
            .queue
            .update(&id, |it| {
                it.auto_start = false;
                if it.status == Status::Pending {
                    it.status = Status::Paused;
                }
            })
            .await
        {
            Ok(item) => {
                state.store.update_item(Table::Queue, &item)?;
                result.insert(id, item.status.as_str().to_string());
            }
            Err(_) => {
                result.insert(id, "not_found".to_string());
            }
        }
    }
    Ok(Json(result))
}

async fn start_items(State(state): State<AppState>, Json(body): Json<StartPauseBody>) -> CoreResult<Json<HashMap<String, String>>> {
    let mut result = HashMap::new();
    for id in body.ids {
        match state
            .queue
            .update(&id, |it| {
                it.auto_start = true;
                if it.status == Status::Paused {
                    it.status = Status::Pending;
                }
            })
            .await
        {
            Ok(item) => {
                state.store.update_item(Table::Queue, &item)?;
                result.insert(id, item.status.as_str().to_string());
            }
            Err(_) => {
                result.insert(id, "not_found".to_string());
            }
        }
    }
    state.queue.wake.notify_waiters();
    Ok(Json(result))
}

#[derive(Deserialize)]
struct DeleteBody {
    ids: Vec<String>,
    r#where: Where,
    #[serde(default)]
    remove_file: bool,
}

async fn delete(State(state): State<AppState>, Json(body): Json<DeleteBody>) -> CoreResult<Json<HashMap<String, String>>> {
    let mut result = HashMap::new();
    for id in body.ids {
        let outcome = match body.r#where {
            Where::Queue => {
                if state.queue.get(&id).await.is_none() {
                    "not_found".to_string()
                } else {
                    state.queue.remove(&id).await;
                    state.store.delete_item(Table::Queue, &id)?;
                    state.events.publish(Event::for_item(EventKind::ItemDeleted, id.clone(), Value::Null)).await;
                    "deleted".to_string()
                }
            }
            Where::Done => match state.store.get_item(Table::History, &id)? {
                None => "not_found".to_string(),
                Some(item) => {
                    if body.remove_file && state.config.defaults.remove_files {
                        remove_item_file(&state, &item).await;
                    }
                    state.store.delete_item(Table::History, &id)?;
                    state.events.publish(Event::for_item(EventKind::ItemDeleted, id.clone(), Value::Null)).await;
                    "deleted".to_string()
                }
            },
        };
        result.insert(id, outcome);
    }
    Ok(Json(result))
}

/// A file that's already missing counts as a successful removal.
async fn remove_item_file(state: &AppState, item: &Item) {
    let Some(filename) = &item.filename else { return };
    let dest_dir = if item.folder.is_empty() {
        state.config.paths.download_path.clone()
    } else {
        state.config.paths.download_path.join(&item.folder)
    };
    match tokio::fs::remove_file(dest_dir.join(filename)).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(item_id = %item.id, error = %e, "failed to remove downloaded file"),
    }
}

async fn pause_all(State(state): State<AppState>) -> Json<Value> {
    state.workers.pause();
    state.events.publish(Event::new(EventKind::Paused, Value::Null)).await;
    Json(serde_json::json!({"status": "paused"}))
}

async fn resume_all(State(state): State<AppState>) -> Json<Value> {
    state.workers.resume();
    state.events.publish(Event::new(EventKind::Resumed, Value::Null)).await;
    Json(serde_json::json!({"status": "resumed"}))
}

#[derive(Serialize)]
struct Snapshot {
    history_count: u64,
    queue: Vec<Item>,
}

async fn live_snapshot(State(state): State<AppState>) -> CoreResult<Json<Snapshot>> {
    let history_count = state.store.history_count()?;
    let mut queue = state.queue.all().await;
    queue.sort_by_key(|i| i.created_at);
    Ok(Json(Snapshot { history_count, queue }))
}
