//! Worker Pool.
//!
//! A fixed set of persistent tasks, each looping: wait for a claimable item,
//! run the Download Driver to completion, release the slot. Each worker polls
//! `QueueManager::claim_next`, which enforces the per-extractor concurrency
//! quota at dispatch time, then idles on a `Notify` (with a timeout fallback)
//! until woken by a new arrival or a status change.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::driver::Driver;
use crate::queue::SharedQueue;

/// Liveness snapshot for one worker slot.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Liveness {
    Idle,
    Busy { item_id: String },
    Error { reason: String },
}

struct WorkerState {
    id: usize,
    liveness: RwLock<Liveness>,
    restart: Notify,
}

pub struct WorkerPool {
    queue: SharedQueue,
    driver: Arc<Driver>,
    config: Arc<WorkerConfig>,
    states: Vec<Arc<WorkerState>>,
    handles: RwLock<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    idle_poll_secs: u64,
    restarts: AtomicU64,
}

impl WorkerPool {
    pub fn new(queue: SharedQueue, driver: Arc<Driver>, config: Arc<WorkerConfig>) -> Self {
        let states = (0..config.max_workers.max(1))
            .map(|id| {
                Arc::new(WorkerState {
                    id,
                    liveness: RwLock::new(Liveness::Idle),
                    restart: Notify::new(),
                })
            })
            .collect();
        Self {
            queue,
            driver,
            config,
            states,
            handles: RwLock::new(Vec::new()),
            shutdown: CancellationToken::new(),
            idle_poll_secs: 2,
            restarts: AtomicU64::new(0),
        }
    }

    pub async fn start(self: &Arc<Self>) {
        let mut handles = self.handles.write().await;
        for state in self.states.clone() {
            let pool = self.clone();
            handles.push(tokio::spawn(async move { pool.run_worker(state).await }));
        }
        tracing::info!(workers = self.states.len(), "worker pool started");
    }

    /// Idempotent: calling `shutdown` more than once, or before `start`, is
    /// harmless.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.handles.write().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        tracing::info!("worker pool stopped");
    }

    pub fn pause(&self) {
        self.queue.pause_all();
    }

    pub fn resume(&self) {
        self.queue.resume_all();
    }

    pub fn wake(&self) {
        self.queue.wake.notify_waiters();
    }

    /// Discards a worker's `Error` state so it resumes claiming items,
    /// without affecting the others.
    pub async fn restart_worker(&self, id: usize) -> bool {
        if let Some(state) = self.states.iter().find(|s| s.id == id) {
            let mut liveness = state.liveness.write().await;
            if matches!(*liveness, Liveness::Error { .. }) {
                *liveness = Liveness::Idle;
                self.restarts.fetch_add(1, Ordering::Relaxed);
                state.restart.notify_waiters();
                return true;
            }
        }
        false
    }

    pub async fn liveness(&self) -> HashMap<usize, Liveness> {
        let mut out = HashMap::new();
        for state in &self.states {
            out.insert(state.id, state.liveness.read().await.clone());
        }
        out
    }

    pub async fn busy_count(&self) -> usize {
        let mut count = 0;
        for state in &self.states {
            if matches!(*state.liveness.read().await, Liveness::Busy { .. }) {
                count += 1;
            }
        }
        count
    }

    pub fn size(&self) -> usize {
        self.states.len()
    }

    async fn run_worker(self: Arc<Self>, state: Arc<WorkerState>) {
        tracing::debug!(worker_id = state.id, "worker started");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if matches!(*state.liveness.read().await, Liveness::Error { .. }) {
                tokio::select! {
                    _ = state.restart.notified() => {},
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(self.idle_poll_secs)) => {},
                }
                continue;
            }

            match self.queue.claim_next(&self.config).await {
                Some(item) => {
                    *state.liveness.write().await = Liveness::Busy { item_id: item.id.clone() };
                    if let Err(e) = self.driver.run(item, &self.queue, &self.shutdown).await {
                        tracing::error!(worker_id = state.id, error = %e, "worker hit an unrecoverable error");
                        *state.liveness.write().await = Liveness::Error { reason: e.to_string() };
                        continue;
                    }
                    *state.liveness.write().await = Liveness::Idle;
                    self.wake();
                }
                None => {
                    tokio::select! {
                        _ = self.queue.wake.notified() => {},
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(self.idle_poll_secs)) => {},
                    }
                }
            }
        }
        tracing::debug!(worker_id = state.id, "worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveManager;
    use crate::cache::InfoCache;
    use crate::config::Config;
    use crate::db::Store;
    use crate::events::EventBus;
    use crate::sources::SourceRegistry;
    use std::collections::HashMap as Map;

    fn test_driver(dir: &std::path::Path) -> Arc<Driver> {
        let config = Arc::new(Config::default());
        let store = Arc::new(Store::open(&dir.join("s.db")).unwrap());
        let events = Arc::new(EventBus::new(64));
        let archive = Arc::new(ArchiveManager::new());
        let cache = Arc::new(InfoCache::new(128, Duration::from_secs(60)));
        let sources = Arc::new(SourceRegistry::default());
        let workers = Arc::new(config.workers.clone());
        Arc::new(Driver::new(config, store, events, archive, cache, sources, Arc::new(RwLock::new(Vec::new())), crate::driver::process::TokioCommandBuilder::default(), workers))
    }

    #[tokio::test]
    async fn empty_queue_never_busies_a_worker() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(crate::queue::QueueManager::new());
        let driver = test_driver(dir.path());
        let config = Arc::new(WorkerConfig { max_workers: 1, max_workers_per_extractor: 1, max_workers_for_extractor: Map::new(), shutdown_grace_period_secs: 1 });
        let pool = Arc::new(WorkerPool::new(queue, driver, config));
        assert_eq!(pool.busy_count().await, 0);
        assert!(matches!(pool.liveness().await.get(&0), Some(Liveness::Idle)));
    }

    #[tokio::test]
    async fn restart_is_a_noop_unless_worker_is_in_error() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(crate::queue::QueueManager::new());
        let driver = test_driver(dir.path());
        let config = Arc::new(WorkerConfig { max_workers: 1, max_workers_per_extractor: 1, max_workers_for_extractor: Map::new(), shutdown_grace_period_secs: 1 });
        let pool = Arc::new(WorkerPool::new(queue, driver, config));
        assert!(!pool.restart_worker(0).await);
    }
}
