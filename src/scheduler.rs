//! Task Scheduler.
//!
//! Ticks on `tasks_handler_timer`; on each tick, every enabled task whose
//! own `timer` cron matches the tick is resolved through a matching
//! `UrlSource`, diffed against its archive file, and the unseen candidates
//! are enqueued via the Queue Manager. Ticks are serialized per task (a
//! per-task lock), while different tasks within one tick fan out up to
//! `playlist_items_concurrency` at a time.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use futures_util::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveManager;
use crate::config::Config;
use crate::db::models::Task;
use crate::db::Store;
use crate::error::CoreResult;
use crate::events::{Event, EventBus, EventKind};
use crate::queue::{Item, ItemSpec, OrderKey, QueueManager};
use crate::sources::{Candidate, SourceRegistry};

pub struct Scheduler {
    config: Arc<Config>,
    store: Arc<Store>,
    queue: Arc<QueueManager>,
    archive: Arc<ArchiveManager>,
    sources: Arc<SourceRegistry>,
    events: Arc<EventBus>,
    task_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Scheduler {
    pub fn new(
        config: Arc<Config>,
        store: Arc<Store>,
        queue: Arc<QueueManager>,
        archive: Arc<ArchiveManager>,
        sources: Arc<SourceRegistry>,
        events: Arc<EventBus>,
    ) -> Self {
        Self { config, store, queue, archive, sources, events, task_locks: Mutex::new(HashMap::new()) }
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let schedule = match parse_five_field_cron(&self.config.scheduler.tasks_handler_timer) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, timer = %self.config.scheduler.tasks_handler_timer, "invalid tasks_handler_timer, scheduler disabled");
                return;
            }
        };
        loop {
            let now = Utc::now();
            let next = match schedule.after(&now).next() {
                Some(n) => n,
                None => return,
            };
            let wait = (next - now).to_std().unwrap_or(std::time::Duration::from_secs(1));
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    self.tick(next).await;
                }
            }
        }
        tracing::debug!("task scheduler stopped");
    }

    /// Runs one tick: every enabled task whose own timer matches `tick_time`
    /// is dispatched, up to `playlist_items_concurrency` at a time.
    pub async fn tick(&self, tick_time: DateTime<Utc>) {
        let tasks = match self.store.list_tasks() {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, "failed to list tasks for scheduler tick");
                return;
            }
        };
        let due: Vec<Task> = tasks.into_iter().filter(|t| t.enabled && task_is_due(t, tick_time)).collect();
        let concurrency = self.config.defaults.playlist_items_concurrency.max(1);
        stream::iter(due)
            .for_each_concurrent(concurrency, |task| async move {
                self.run_task(task, tick_time).await;
            })
            .await;
    }

    async fn lock_for(&self, task_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.task_locks.lock().await;
        Arc::clone(locks.entry(task_id).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    async fn run_task(&self, task: Task, tick_time: DateTime<Utc>) {
        let lock = self.lock_for(task.id).await;
        let _guard = lock.lock().await;

        let candidates = match self.resolve_candidates(&task).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(task_id = task.id, task = %task.name, error = %e, "task dispatch failed to resolve candidates");
                self.events.publish(Event::new(EventKind::LogError, serde_json::json!({"task": task.name, "error": e.to_string()}))).await;
                return;
            }
        };
        let handler_name = self.sources.resolve(&task.url).map(|s| s.name().to_string());
        let archive_path = self.archive_path_for_task(&task);

        let mut enqueued = 0usize;
        for (sub_index, candidate) in candidates.into_iter().enumerate() {
            if let Some(path) = &archive_path {
                match self.archive.contains(path, &candidate.archive_id).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(task_id = task.id, error = %e, "archive check failed, enqueuing anyway");
                    }
                }
            }
            self.enqueue_candidate(&task, &candidate, &handler_name, tick_time, sub_index as u32).await;
            enqueued += 1;
        }
        tracing::info!(task_id = task.id, task = %task.name, enqueued, "task tick dispatched");
    }

    async fn resolve_candidates(&self, task: &Task) -> CoreResult<Vec<Candidate>> {
        match self.sources.resolve(&task.url) {
            Some(source) => source.enumerate(&task.url).await,
            None if !task.handler_enabled => Ok(vec![Candidate {
                url: task.url.clone(),
                archive_id: task.url.clone(),
                metadata: serde_json::Value::Null,
            }]),
            None => Ok(Vec::new()),
        }
    }

    async fn enqueue_candidate(&self, task: &Task, candidate: &Candidate, handler_name: &Option<String>, tick_time: DateTime<Utc>, sub_index: u32) {
        let mut extras = HashMap::new();
        extras.insert("source_id".to_string(), serde_json::json!(task.id));
        extras.insert("source_name".to_string(), serde_json::json!(task.name));
        if let Some(name) = handler_name {
            extras.insert("source_handler".to_string(), serde_json::json!(name));
        }

        let spec = ItemSpec {
            url: candidate.url.clone(),
            preset: Some(task.preset.clone()).filter(|s| !s.is_empty()),
            folder: Some(task.folder.clone()).filter(|s| !s.is_empty()),
            template: Some(task.template.clone()).filter(|s| !s.is_empty()),
            cli: Some(task.cli.clone()).filter(|s| !s.is_empty()),
            cookies: task.cookies.clone(),
            auto_start: task.auto_start,
            extras,
        };
        let id = uuid::Uuid::new_v4().to_string();
        let item = Item::new(id.clone(), spec, tick_time);
        if let Err(e) = self.store.insert_item(crate::db::Table::Queue, &item) {
            tracing::error!(task_id = task.id, error = %e, "failed to persist task-dispatched item");
            return;
        }
        self.queue.add(item, OrderKey { created_at: tick_time, sub_index }).await;
        self.queue.wake.notify_waiters();
        self.events.publish(Event::for_item(EventKind::ItemAdded, id, serde_json::json!({"source": "task", "task_id": task.id}))).await;
    }

    fn archive_path_for_task(&self, task: &Task) -> Option<std::path::PathBuf> {
        let preset = if task.preset.is_empty() { None } else { self.store.get_preset(&task.preset).ok().flatten() };
        let archive = preset.map(|p| p.download_archive).filter(|a| !a.is_empty())?;
        Some(self.config.paths.config_path.join(archive))
    }

    /// Marks every current candidate of `task` as archived without
    /// downloading anything.
    pub async fn mark_all(&self, task_id: i64) -> CoreResult<usize> {
        let task = self.get_task(task_id)?;
        let candidates = self.resolve_candidates(&task).await?;
        let path = self.archive_path_for_task(&task).ok_or_else(|| crate::error::CoreError::validation(format!("task {task_id} has no preset archive configured")))?;
        let ids: Vec<String> = candidates.into_iter().map(|c| c.archive_id).collect();
        let added = self.archive.append(&path, &ids, false).await?;
        Ok(added.len())
    }

    /// Inverse of `mark_all`: removes every current candidate's archive-id.
    pub async fn unmark_all(&self, task_id: i64) -> CoreResult<usize> {
        let task = self.get_task(task_id)?;
        let candidates = self.resolve_candidates(&task).await?;
        let path = self.archive_path_for_task(&task).ok_or_else(|| crate::error::CoreError::validation(format!("task {task_id} has no preset archive configured")))?;
        let ids: Vec<String> = candidates.into_iter().map(|c| c.archive_id).collect();
        let removed = self.archive.remove(&path, &ids).await?;
        Ok(removed.len())
    }

    fn get_task(&self, task_id: i64) -> CoreResult<Task> {
        self.store
            .list_tasks()?
            .into_iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| crate::error::CoreError::not_found(format!("task {task_id} not found")))
    }
}

/// Whether `task`'s own cron fires on `tick_time`. Blank/whitespace-only
/// means "no schedule, handler-only" — the task never ticks on its own.
fn task_is_due(task: &Task, tick_time: DateTime<Utc>) -> bool {
    let timer = task.timer.trim();
    if timer.is_empty() {
        return false;
    }
    match parse_five_field_cron(timer) {
        Ok(schedule) => schedule.includes(tick_time),
        Err(e) => {
            tracing::warn!(task_id = task.id, timer, error = %e, "task has an unparsable timer, skipping");
            false
        }
    }
}

/// The `cron` crate parses 6-field (with leading seconds) expressions; task
/// timers use the conventional 5 fields (minute hour dom month dow).
fn parse_five_field_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    Schedule::from_str(&format!("0 {expr}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::TaskSpec;

    fn task(timer: &str) -> Task {
        Task {
            id: 1,
            name: "t".into(),
            url: "https://example.com/feed".into(),
            timer: timer.into(),
            preset: String::new(),
            folder: String::new(),
            template: String::new(),
            cli: String::new(),
            cookies: None,
            auto_start: true,
            handler_enabled: true,
            enabled: true,
        }
    }

    #[test]
    fn blank_timer_never_ticks() {
        let t = task("");
        assert!(!task_is_due(&t, Utc::now()));
        let t2 = task("   ");
        assert!(!task_is_due(&t2, Utc::now()));
    }

    #[test]
    fn every_fifteen_minutes_ticks_on_quarter_hours() {
        let t = task("*/15 * * * *");
        let tick = DateTime::parse_from_rfc3339("2026-01-01T00:15:00Z").unwrap().with_timezone(&Utc);
        let off = DateTime::parse_from_rfc3339("2026-01-01T00:16:00Z").unwrap().with_timezone(&Utc);
        assert!(task_is_due(&t, tick));
        assert!(!task_is_due(&t, off));
    }

    fn scheduler_harness(dir: &std::path::Path) -> (Arc<Scheduler>, Arc<Store>, Arc<QueueManager>) {
        let config = Arc::new(Config::default());
        let store = Arc::new(Store::open(&dir.join("s.db")).unwrap());
        let queue = Arc::new(QueueManager::new());
        let archive = Arc::new(ArchiveManager::new());
        let sources = Arc::new(SourceRegistry::default());
        let events = Arc::new(EventBus::new(64));
        let scheduler = Arc::new(Scheduler::new(config, Arc::clone(&store), Arc::clone(&queue), archive, sources, events));
        (scheduler, store, queue)
    }

    #[tokio::test]
    async fn due_task_enqueues_via_direct_source() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, store, queue) = scheduler_harness(dir.path());
        store
            .create_task(TaskSpec {
                name: "feed".into(),
                url: "https://example.com/v".into(),
                timer: "*/15 * * * *".into(),
                preset: String::new(),
                folder: String::new(),
                template: String::new(),
                cli: String::new(),
                cookies: None,
                auto_start: true,
                handler_enabled: true,
                enabled: true,
            })
            .unwrap();
        let tick = DateTime::parse_from_rfc3339("2026-01-01T00:15:00Z").unwrap().with_timezone(&Utc);
        scheduler.tick(tick).await;
        assert_eq!(queue.all().await.len(), 1);
        let item = &queue.all().await[0];
        assert_eq!(item.extras.get("source_name").unwrap(), "feed");
    }

    #[tokio::test]
    async fn task_with_no_timer_is_skipped_on_tick() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, store, queue) = scheduler_harness(dir.path());
        store
            .create_task(TaskSpec {
                name: "handler-only".into(),
                url: "https://example.com/v".into(),
                timer: String::new(),
                preset: String::new(),
                folder: String::new(),
                template: String::new(),
                cli: String::new(),
                cookies: None,
                auto_start: true,
                handler_enabled: true,
                enabled: true,
            })
            .unwrap();
        scheduler.tick(Utc::now()).await;
        assert!(queue.all().await.is_empty());
    }
}
