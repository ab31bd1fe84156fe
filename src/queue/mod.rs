//! Queue Manager.
//!
//! Holds the in-memory working set of queued items: **waiting** (admitted,
//! not yet claimed) and **in-flight** (a worker owns it). Quota is checked
//! at dispatch time, not at admission, so `add` never blocks on capacity.
//! `claim_next` holds a single write lock on `in_flight` across both the
//! scan and the commit, so two concurrent dispatchers can never claim the
//! same item.

pub mod item;
pub mod state;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock};

pub use item::{validate_folder, Item, ItemSpec};
pub use state::{ItemState, StateFactory, Status};

use crate::config::WorkerConfig;
use crate::error::{CoreError, CoreResult};

/// FIFO ordering key: parent `created_at` plus a sub-index so playlist
/// children group together without jumping ahead of unrelated later items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderKey {
    pub created_at: DateTime<Utc>,
    pub sub_index: u32,
}

pub struct QueueManager {
    items: RwLock<HashMap<String, Item>>,
    order: RwLock<HashMap<String, OrderKey>>,
    in_flight: RwLock<HashSet<String>>,
    paused: AtomicBool,
    pub wake: Notify,
}

impl QueueManager {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            order: RwLock::new(HashMap::new()),
            in_flight: RwLock::new(HashSet::new()),
            paused: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub async fn add(&self, item: Item, order: OrderKey) {
        let id = item.id.clone();
        self.items.write().await.insert(id.clone(), item);
        self.order.write().await.insert(id, order);
        self.wake.notify_waiters();
    }

    pub async fn get(&self, id: &str) -> Option<Item> {
        self.items.read().await.get(id).cloned()
    }

    pub async fn update<F: FnOnce(&mut Item)>(&self, id: &str, f: F) -> CoreResult<Item> {
        let mut items = self.items.write().await;
        let item = items.get_mut(id).ok_or_else(|| CoreError::not_found(format!("item {id} not found")))?;
        f(item);
        Ok(item.clone())
    }

    pub async fn remove(&self, id: &str) -> Option<Item> {
        self.in_flight.write().await.remove(id);
        self.order.write().await.remove(id);
        self.items.write().await.remove(id)
    }

    pub async fn all(&self) -> Vec<Item> {
        self.items.read().await.values().cloned().collect()
    }

    pub async fn history_count_excluded(&self) -> usize {
        self.items.read().await.len()
    }

    pub fn pause_all(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume_all(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn in_flight_counts_by_extractor(items: &HashMap<String, Item>, in_flight: &HashSet<String>) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for id in in_flight.iter() {
            if let Some(item) = items.get(id) {
                if let Some(extractor) = &item.extractor {
                    *counts.entry(extractor.to_ascii_lowercase()).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    /// Claims the next eligible waiting item honoring per-extractor quota.
    /// Returns `None` if no item is eligible right now (global pause, or
    /// every candidate's extractor is at quota). The scan and the
    /// in-flight-set insertion happen under one held write lock so two
    /// concurrent callers can never both claim the same item.
    pub async fn claim_next(&self, workers: &WorkerConfig) -> Option<Item> {
        if self.is_paused() {
            return None;
        }
        let items = self.items.read().await;
        let order = self.order.read().await;
        let mut in_flight = self.in_flight.write().await;
        let counts = Self::in_flight_counts_by_extractor(&items, &in_flight);

        let mut waiting: Vec<&Item> = items
            .values()
            .filter(|it| it.status == Status::Pending && !in_flight.contains(&it.id))
            .collect();
        waiting.sort_by_key(|it| order.get(&it.id).copied().unwrap_or(OrderKey { created_at: it.created_at, sub_index: 0 }));

        let candidate = waiting.into_iter().find(|it| match &it.extractor {
            None => true,
            Some(extractor) => {
                let quota = workers.quota_for(extractor);
                counts.get(&extractor.to_ascii_lowercase()).copied().unwrap_or(0) < quota
            }
        });

        let id = candidate.map(|it| it.id.clone())?;
        in_flight.insert(id.clone());
        drop(in_flight);
        drop(order);
        items.get(&id).cloned()
    }

    /// Called once an in-flight item's `extractor` becomes known (after
    /// "preparing") and it turns out quota is already exhausted: releases
    /// the item back to waiting so the next dispatch scan can pick someone
    /// else.
    pub async fn release_over_quota(&self, id: &str) {
        self.in_flight.write().await.remove(id);
        self.wake.notify_waiters();
    }

    pub async fn release(&self, id: &str) {
        self.in_flight.write().await.remove(id);
    }

    /// In-flight items (excluding `excluding`) whose extractor matches,
    /// case-insensitively. Used to re-check quota once an item's extractor
    /// becomes known after "preparing".
    pub async fn in_flight_count_for_extractor(&self, extractor: &str, excluding: &str) -> usize {
        let items = self.items.read().await;
        let in_flight = self.in_flight.read().await;
        in_flight
            .iter()
            .filter(|id| id.as_str() != excluding)
            .filter(|id| {
                items
                    .get(id.as_str())
                    .and_then(|it| it.extractor.as_deref())
                    .map(|e| e.eq_ignore_ascii_case(extractor))
                    .unwrap_or(false)
            })
            .count()
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.read().await.len()
    }

    pub async fn downloading_count(&self) -> usize {
        let items = self.items.read().await;
        items.values().filter(|i| i.status == Status::Downloading).count()
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedQueue = Arc<QueueManager>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn item(id: &str, extractor: Option<&str>) -> Item {
        Item {
            id: id.to_string(),
            url: "https://example.com".to_string(),
            status: Status::Pending,
            created_at: Utc::now(),
            preset: String::new(),
            folder: String::new(),
            template: String::new(),
            cli: String::new(),
            cookies: None,
            auto_start: true,
            extras: Map::new(),
            error: None,
            filename: None,
            file_size: None,
            extractor: extractor.map(|s| s.to_string()),
            title: None,
            thumbnail: None,
            duration: None,
            downloaded_bytes: 0,
            total_bytes: None,
            speed_bytes_per_sec: None,
            eta_seconds: None,
        }
    }

    fn workers(max_workers: usize, per_extractor: usize) -> WorkerConfig {
        WorkerConfig {
            max_workers,
            max_workers_per_extractor: per_extractor,
            max_workers_for_extractor: Map::new(),
            shutdown_grace_period_secs: 5,
        }
    }

    #[tokio::test]
    async fn unknown_extractor_items_are_always_eligible() {
        let q = QueueManager::new();
        q.add(item("a", None), OrderKey { created_at: Utc::now(), sub_index: 0 }).await;
        let claimed = q.claim_next(&workers(2, 1)).await;
        assert_eq!(claimed.unwrap().id, "a");
    }

    #[tokio::test]
    async fn quota_blocks_third_item_same_extractor() {
        let q = QueueManager::new();
        for id in ["a", "b", "c"] {
            q.add(item(id, Some("youtube")), OrderKey { created_at: Utc::now(), sub_index: 0 }).await;
        }
        let w = workers(3, 1);
        let first = q.claim_next(&w).await.unwrap();
        assert_eq!(first.id, "a");
        // "a" is now in-flight and counted against quota=1, so no more youtube items are eligible.
        assert!(q.claim_next(&w).await.is_none());
    }

    #[tokio::test]
    async fn pause_all_prevents_claims() {
        let q = QueueManager::new();
        q.add(item("a", None), OrderKey { created_at: Utc::now(), sub_index: 0 }).await;
        q.pause_all();
        assert!(q.claim_next(&workers(2, 2)).await.is_none());
        q.resume_all();
        assert!(q.claim_next(&workers(2, 2)).await.is_some());
    }

    #[tokio::test]
    async fn in_flight_count_for_extractor_excludes_self_and_other_extractors() {
        let q = QueueManager::new();
        q.add(item("a", Some("youtube")), OrderKey { created_at: Utc::now(), sub_index: 0 }).await;
        q.add(item("b", Some("youtube")), OrderKey { created_at: Utc::now(), sub_index: 0 }).await;
        q.add(item("c", Some("vimeo")), OrderKey { created_at: Utc::now(), sub_index: 0 }).await;
        q.claim_next(&workers(3, 3)).await; // claims "a" (unknown extractor isn't the case here, but first in FIFO)
        // Manually mark b and c in-flight to simulate concurrent dispatch.
        q.in_flight.write().await.insert("b".to_string());
        q.in_flight.write().await.insert("c".to_string());
        assert_eq!(q.in_flight_count_for_extractor("youtube", "a").await, 1);
        assert_eq!(q.in_flight_count_for_extractor("YOUTUBE", "b").await, 1);
        assert_eq!(q.in_flight_count_for_extractor("vimeo", "a").await, 1);
    }

    #[tokio::test]
    async fn fifo_tie_break_by_created_at() {
        let q = QueueManager::new();
        let t0 = Utc::now();
        q.add(item("second", None), OrderKey { created_at: t0 + chrono::Duration::seconds(1), sub_index: 0 }).await;
        q.add(item("first", None), OrderKey { created_at: t0, sub_index: 0 }).await;
        let claimed = q.claim_next(&workers(5, 5)).await.unwrap();
        assert_eq!(claimed.id, "first");
    }
}
