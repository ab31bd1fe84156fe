//! Download Driver.
//!
//! Drives one item from `pending` through to a terminal status: prepares a
//! scratch directory, resolves effective config and metadata, checks the
//! live/premiere guard and the archive, spawns the downloader-tool
//! subprocess, parses its progress stream, postprocesses the finished file
//! into the download root, and records the archive entry. Progress is
//! throttled and cancellation is checked at each suspension point, with a
//! SIGTERM-before-SIGKILL shutdown for the child process.

pub mod process;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveManager;
use crate::cache::InfoCache;
use crate::config::{Config, WorkerConfig};
use crate::db::{models::Preset, Store, Table};
use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventBus, EventKind};
use crate::presets::{CompiledCondition, Resolver};
use crate::queue::{Item, QueueManager, Status};
use crate::sources::SourceRegistry;
use process::{parse_output_line, CommandBuilder, OutputLine};

/// Progress events are coalesced to at most this many per second per item.
const PROGRESS_EVENTS_PER_SEC: u64 = 4;
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(10);

pub struct Driver {
    config: Arc<Config>,
    store: Arc<Store>,
    events: Arc<EventBus>,
    archive: Arc<ArchiveManager>,
    cache: Arc<InfoCache<Value>>,
    sources: Arc<SourceRegistry>,
    conditions: Arc<RwLock<Vec<CompiledCondition>>>,
    command_builder: Box<dyn CommandBuilder>,
    workers: Arc<WorkerConfig>,
}

impl Driver {
    pub fn new(
        config: Arc<Config>,
        store: Arc<Store>,
        events: Arc<EventBus>,
        archive: Arc<ArchiveManager>,
        cache: Arc<InfoCache<Value>>,
        sources: Arc<SourceRegistry>,
        conditions: Arc<RwLock<Vec<CompiledCondition>>>,
        command_builder: impl CommandBuilder + 'static,
        workers: Arc<WorkerConfig>,
    ) -> Self {
        Self { config, store, events, archive, cache, sources, conditions, command_builder: Box::new(command_builder), workers }
    }

    /// Reloads compiled conditions from the persistence store. Call at
    /// startup and whenever a `config_update` event signals a conditions
    /// change.
    pub async fn reload_conditions(&self) -> CoreResult<()> {
        let rows = self.store.list_conditions()?;
        let mut compiled = Vec::with_capacity(rows.len());
        for row in rows {
            match CompiledCondition::compile(row) {
                Ok(c) => compiled.push(c),
                Err(e) => tracing::warn!(error = %e, "skipping condition with an unparsable filter"),
            }
        }
        *self.conditions.write().await = compiled;
        Ok(())
    }

    /// Drives `item` to a terminal state. Returns `Err` only for conditions
    /// that indicate the *worker* is unhealthy (e.g. the persistence store
    /// is unreachable) — ordinary download failures are recorded on the item
    /// itself and this still returns `Ok(())`.
    pub async fn run(&self, item: Item, queue: &QueueManager, shutdown: &CancellationToken) -> CoreResult<()> {
        let id = item.id.clone();
        match self.run_inner(item, queue, shutdown).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(item_id = %id, error = %e, "download driver failed for item");
                if let Ok(mut item) = queue.update(&id, |it| {
                    it.status = Status::Error;
                    it.error = Some(e.to_string());
                }).await {
                    item.status = Status::Error;
                    let _ = self.store.move_to_history(&item);
                    queue.remove(&id).await;
                    self.events.publish(Event::for_item(EventKind::ItemCompleted, id.clone(), serde_json::json!({"status": "error"}))).await;
                }
                Ok(())
            }
        }
    }

    async fn run_inner(&self, mut item: Item, queue: &QueueManager, shutdown: &CancellationToken) -> CoreResult<()> {
        // --- 1. Prepare -------------------------------------------------
        let source_name = self.sources.resolve(&item.url).map(|s| s.name().to_string());
        tracing::info!(item_id = %item.id, url = %item.url, source = ?source_name, "preparing item");
        let preset = self.load_preset(&item).await?;
        let mut effective = Resolver::merge(&self.config.defaults, preset.as_ref(), &item);
        let scratch_dir = self.config.paths.temp_path.join(&item.id);
        tokio::fs::create_dir_all(&scratch_dir).await?;
        if let Some(cookies) = &effective.cookies {
            tokio::fs::write(scratch_dir.join("cookies.txt"), cookies).await?;
        }

        // --- 2. Extract info ---------------------------------------------
        item = self.set_status(queue, &item.id, Status::Preparing, |_| {}).await?;

        let info = self.extract_info(&item.url, &item.preset, &effective, shutdown).await?;
        let extractor = info.get("extractor").and_then(Value::as_str).map(str::to_string);
        item = queue.update(&item.id, |it| it.extractor = extractor.clone()).await?;
        self.store.update_item(Table::Queue, &item)?;

        // Quota is only known once the extractor is: if admitting this item
        // as "unknown extractor" turns out to have exceeded the quota now
        // that it's known, hand the slot back and let the next dispatch
        // scan pick someone else (§4.7).
        if let Some(extractor) = &extractor {
            let quota = self.workers.quota_for(extractor);
            let others = queue.in_flight_count_for_extractor(extractor, &item.id).await;
            if others >= quota {
                queue.release_over_quota(&item.id).await;
                item = queue.update(&item.id, |it| it.status = Status::Pending).await?;
                self.store.update_item(Table::Queue, &item)?;
                return Ok(());
            }
        }

        if let Some(obj) = info.as_object() {
            let conditions = self.conditions.read().await;
            Resolver::apply_conditions(&mut effective, &conditions, obj);
        }

        if let Some(title) = info.get("title").and_then(Value::as_str) {
            item = queue.update(&item.id, |it| it.title = Some(title.to_string())).await?;
        }

        // --- 3. Live/premiere guard ---------------------------------------
        if self.config.defaults.prevent_live_premiere && is_unstarted_premiere(&info) {
            return self.finish_terminal(queue, item, Status::NotLive).await;
        }

        // --- 4. Archive check ----------------------------------------------
        let archive_id = info.get("id").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| item.url.clone());
        let archive_path = self.archive_path(&effective.download_archive);
        if let Some(path) = &archive_path {
            if self.archive.contains(path, &archive_id).await? {
                return self.finish_terminal(queue, item, Status::Skip).await;
            }
        }

        // --- 5. Download -----------------------------------------------------
        item = self.set_status(queue, &item.id, Status::Downloading, |_| {}).await?;
        let last_error_line = self.run_download(&item, &effective, &scratch_dir, queue, shutdown).await?;

        if queue.get(&item.id).await.map(|it| it.status) == Some(Status::Cancelled) {
            return self.finish_terminal(queue, item, Status::Cancelled).await;
        }
        if let Some(err) = last_error_line {
            item = queue.update(&item.id, |it| it.error = Some(err)).await?;
            return self.finish_terminal(queue, item, Status::Error).await;
        }

        // --- 6. Postprocess --------------------------------------------------
        item = self.set_status(queue, &item.id, Status::Postprocessing, |_| {}).await?;
        let moved = match self.postprocess(&item, &effective, &scratch_dir).await {
            Ok(moved) => moved,
            Err(e) => {
                item = queue.update(&item.id, |it| it.error = Some(e.to_string())).await?;
                return self.finish_terminal(queue, item, Status::Error).await;
            }
        };
        if let Some(name) = moved {
            item = queue.update(&item.id, |it| it.filename = Some(name)).await?;
        }
        if !effective.folder.is_empty() && effective.folder != item.folder {
            let folder = effective.folder.clone();
            item = queue.update(&item.id, |it| it.folder = folder).await?;
        }
        if !self.config.defaults.temp_keep {
            let _ = tokio::fs::remove_dir_all(&scratch_dir).await;
        }

        // --- 7. Archive write --------------------------------------------------
        if let Some(path) = &archive_path {
            self.archive.append(path, &[archive_id], false).await?;
        }

        // --- 8. Terminal -----------------------------------------------------
        self.finish_terminal(queue, item, Status::Finished).await
    }

    async fn load_preset(&self, item: &Item) -> CoreResult<Option<Preset>> {
        let name = crate::presets::resolve_preset_name(&item.preset, &self.config.defaults.default_preset);
        if name.is_empty() {
            return Ok(None);
        }
        self.store.get_preset(name)
    }

    fn archive_path(&self, download_archive: &str) -> Option<PathBuf> {
        if download_archive.is_empty() {
            None
        } else {
            Some(self.config.paths.config_path.join(download_archive))
        }
    }

    async fn set_status(&self, queue: &QueueManager, id: &str, status: Status, mutate: impl FnOnce(&mut Item)) -> CoreResult<Item> {
        let item = queue.update(id, |it| {
            it.status = status;
            mutate(it);
        }).await?;
        self.store.update_item(Table::Queue, &item)?;
        self.events.publish(Event::for_item(EventKind::ItemStatus, item.id.clone(), serde_json::json!({"status": status.as_str()}))).await;
        Ok(item)
    }

    async fn finish_terminal(&self, queue: &QueueManager, mut item: Item, status: Status) -> CoreResult<()> {
        item.status = status;
        self.store.move_to_history(&item)?;
        queue.remove(&item.id).await;
        let kind = match status {
            Status::Finished => EventKind::ItemCompleted,
            Status::Cancelled => EventKind::ItemCancelled,
            _ => EventKind::ItemMoved,
        };
        self.events.publish(Event::for_item(kind, item.id.clone(), serde_json::json!({"status": status.as_str()}))).await;
        Ok(())
    }

    /// Extracts metadata via the Info Extractor Cache, keyed on the item's
    /// effective (url, preset, cli) triple.
    async fn extract_info(&self, url: &str, preset: &str, effective: &crate::presets::EffectiveConfig, shutdown: &CancellationToken) -> CoreResult<Value> {
        self.get_info(url, preset, &effective.cli, false, shutdown).await.map(|(value, _status)| value)
    }

    /// Consults the Info Extractor Cache, single-flighting concurrent
    /// callers for the same key. `force` evicts any cached value first so
    /// the call always re-extracts.
    pub async fn get_info(&self, url: &str, preset: &str, cli: &str, force: bool, shutdown: &CancellationToken) -> CoreResult<(Value, crate::cache::CacheStatus)> {
        let cli_tokens: Vec<String> = cli.split_whitespace().map(str::to_string).collect();
        let key = crate::cache::cache_key(url, preset, &cli_tokens);
        if force {
            self.cache.invalidate(&key).await;
        }
        let ttl = Duration::from_secs(self.config.cache.default_ttl_secs);
        let program = self.config.paths.downloader_tool_path.clone();
        let args = vec!["-j".to_string(), "--skip-download".to_string(), url.to_string()];
        let timeout = Duration::from_secs(self.config.defaults.extract_info_timeout_secs);
        let builder = &self.command_builder;

        self.cache
            .get_or_compute(&key, ttl, || async {
                run_info_extraction(builder.as_ref(), &program, &args, timeout, shutdown).await.map_err(|e| e.to_string())
            })
            .await
            .map_err(CoreError::extraction)
    }

    /// Spawns the downloader tool, parses its stdout for progress/log lines,
    /// and honours cancellation. Returns `Some(last error line)` on a
    /// non-zero exit, `None` on success.
    async fn run_download(&self, item: &Item, effective: &crate::presets::EffectiveConfig, scratch_dir: &Path, queue: &QueueManager, shutdown: &CancellationToken) -> CoreResult<Option<String>> {
        let mut args: Vec<String> = effective.cli.split_whitespace().map(str::to_string).collect();
        if !effective.template.is_empty() {
            args.push("-o".to_string());
            args.push(scratch_dir.join(&effective.template).to_string_lossy().to_string());
        }
        if scratch_dir.join("cookies.txt").exists() {
            args.push("--cookies".to_string());
            args.push(scratch_dir.join("cookies.txt").to_string_lossy().to_string());
        }
        args.push(item.url.clone());

        let mut child = self
            .command_builder
            .build(&self.config.paths.downloader_tool_path, &args)
            .spawn()
            .map_err(|e| CoreError::download(format!("failed to spawn downloader tool: {e}")))?;

        let stdout = child.stdout.take().ok_or_else(|| CoreError::internal("downloader subprocess had no stdout pipe"))?;
        let mut lines = BufReader::new(stdout).lines();

        let mut last_error_line: Option<String> = None;
        let mut last_emit = Instant::now() - Duration::from_secs(1);
        let min_interval = Duration::from_millis(1000 / PROGRESS_EVENTS_PER_SEC);

        loop {
            tokio::select! {
                cancelled = self.poll_cancelled(queue, &item.id) => {
                    if cancelled || shutdown.is_cancelled() {
                        self.kill_gracefully(&mut child).await;
                        return Ok(None);
                    }
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => match parse_output_line(&line) {
                            OutputLine::Progress(p) => {
                                if last_emit.elapsed() >= min_interval {
                                    last_emit = Instant::now();
                                    self.publish_progress(queue, &item.id, &p).await;
                                }
                            }
                            OutputLine::Log(text) => {
                                if !text.is_empty() {
                                    let is_error = text.to_ascii_lowercase().contains("error");
                                    if is_error {
                                        last_error_line = Some(text.clone());
                                    }
                                    let kind = if is_error { EventKind::LogError } else { EventKind::LogInfo };
                                    self.events.publish(Event::for_item(kind, item.id.clone(), serde_json::json!({"line": text}))).await;
                                }
                            }
                        },
                        Ok(None) => break,
                        Err(e) => {
                            tracing::debug!(item_id = %item.id, error = %e, "failed reading downloader stdout line");
                            break;
                        }
                    }
                }
            }
        }

        let status = child.wait().await.map_err(|e| CoreError::download(format!("failed waiting on downloader tool: {e}")))?;
        if status.success() {
            Ok(None)
        } else {
            Ok(Some(last_error_line.unwrap_or_else(|| format!("downloader tool exited with {status}"))))
        }
    }

    async fn poll_cancelled(&self, queue: &QueueManager, id: &str) -> bool {
        loop {
            if let Some(item) = queue.get(id).await {
                if item.status == Status::Cancelled {
                    return true;
                }
            } else {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn kill_gracefully(&self, child: &mut tokio::process::Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGTERM);
            }
            let waited = tokio::time::timeout(KILL_GRACE_PERIOD, child.wait()).await;
            if waited.is_err() {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }

    async fn publish_progress(&self, queue: &QueueManager, id: &str, p: &process::ProgressUpdate) {
        let updated = queue.update(id, |it| {
            if let Some(b) = p.downloaded_bytes {
                it.downloaded_bytes = b;
            }
            if p.total_bytes.is_some() {
                it.total_bytes = p.total_bytes;
            }
            if p.speed.is_some() {
                it.speed_bytes_per_sec = p.speed;
            }
            if p.eta.is_some() {
                it.eta_seconds = p.eta;
            }
        }).await;
        if let Ok(item) = updated {
            self.events.publish(Event::for_item(
                EventKind::ItemUpdated,
                item.id.clone(),
                serde_json::json!({
                    "downloaded_bytes": item.downloaded_bytes,
                    "total_bytes": item.total_bytes,
                    "speed_bytes_per_sec": item.speed_bytes_per_sec,
                    "eta_seconds": item.eta_seconds,
                }),
            )).await;
        }
    }

    /// Moves whatever landed in `scratch_dir` into `download_path/folder`,
    /// creating the destination if absent. Returns the name of the primary
    /// moved file, if any.
    async fn postprocess(&self, item: &Item, effective: &crate::presets::EffectiveConfig, scratch_dir: &Path) -> Result<Option<String>, io::Error> {
        let dest_dir = if effective.folder.is_empty() {
            self.config.paths.download_path.clone()
        } else {
            self.config.paths.download_path.join(&effective.folder)
        };
        tokio::fs::create_dir_all(&dest_dir).await?;

        let mut primary = None;
        let mut entries = tokio::fs::read_dir(scratch_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                let name = entry.file_name();
                if name == "cookies.txt" {
                    continue;
                }
                let dest = dest_dir.join(&name);
                tokio::fs::rename(entry.path(), &dest).await?;
                if primary.is_none() {
                    primary = Some(name.to_string_lossy().to_string());
                }
            }
        }
        let _ = &item.id;
        Ok(primary)
    }
}

fn is_unstarted_premiere(info: &Value) -> bool {
    matches!(info.get("live_status").and_then(Value::as_str), Some("is_upcoming") | Some("is_live"))
        || info.get("is_live").and_then(Value::as_bool).unwrap_or(false)
}

async fn run_info_extraction(builder: &dyn CommandBuilder, program: &str, args: &[String], timeout: Duration, shutdown: &CancellationToken) -> anyhow::Result<Value> {
    let mut child = builder.build(program, args).spawn()?;
    let output = tokio::select! {
        result = tokio::time::timeout(timeout, child.wait_with_output()) => result??,
        _ = shutdown.cancelled() => anyhow::bail!("shutting down"),
    };
    if !output.status.success() {
        anyhow::bail!("info extraction exited with {}: {}", output.status, String::from_utf8_lossy(&output.stderr));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let last_line = stdout.lines().last().unwrap_or("");
    let value: Value = serde_json::from_str(last_line)?;
    Ok(value)
}

