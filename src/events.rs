//! Event Bus: in-process typed pub/sub.
//!
//! Delivery is at-most-once and best-effort: each subscriber owns a bounded
//! buffer; a publish that finds a subscriber's buffer full drops the oldest
//! entry (and counts it) rather than blocking the publisher. `item_updated`
//! is the one kind allowed to coalesce — a newer update for the same item
//! overwrites an older, still-buffered one instead of queuing both.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

/// Closed set of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ItemAdded,
    ItemUpdated,
    ItemCompleted,
    ItemCancelled,
    ItemDeleted,
    ItemMoved,
    ItemStatus,
    Paused,
    Resumed,
    LogInfo,
    LogSuccess,
    LogWarning,
    LogError,
    ConfigUpdate,
    Connected,
    ActiveQueue,
    Test,
}

/// A single published event. Payloads are intentionally loose JSON values
/// here (the HTTP/WS binding re-serializes them verbatim); the closed part
/// of the model is `EventKind`, not the payload shape, since payloads vary
/// per kind and per caller (item snapshot, log string, config table name...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// For item-scoped events, the item id this event concerns.
    pub item_id: Option<String>,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self { kind, item_id: None, payload }
    }

    pub fn for_item(kind: EventKind, item_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { kind, item_id: Some(item_id.into()), payload }
    }
}

struct SubscriberState {
    kinds: Option<HashSet<EventKind>>,
    buffer: Mutex<VecDeque<Event>>,
    notify: Notify,
    depth: usize,
    dropped: AtomicU64,
}

impl SubscriberState {
    fn wants(&self, kind: EventKind) -> bool {
        self.kinds.as_ref().map(|k| k.contains(&kind)).unwrap_or(true)
    }

    async fn push(&self, event: Event) {
        let mut buf = self.buffer.lock().await;
        if event.kind == EventKind::ItemUpdated {
            if let Some(slot) = buf
                .iter_mut()
                .find(|e| e.kind == EventKind::ItemUpdated && e.item_id == event.item_id)
            {
                *slot = event;
                self.notify.notify_one();
                return;
            }
        }
        if buf.len() >= self.depth {
            buf.pop_front();
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(dropped_total = total, "event subscriber buffer full, dropping oldest event");
        }
        buf.push_back(event);
        self.notify.notify_one();
    }
}

/// A handle returned by `subscribe`; also the receive side.
pub struct Subscription {
    id: u64,
    state: Arc<SubscriberState>,
}

impl Subscription {
    pub fn token(&self) -> u64 {
        self.id
    }

    /// Awaits the next event for this subscriber. Never returns `None`
    /// while the bus is alive — only once the subscription has been
    /// explicitly unsubscribed does the bus stop feeding it, at which
    /// point further calls simply wait forever (the caller is expected to
    /// stop polling once it has unsubscribed).
    pub async fn recv(&mut self) -> Event {
        loop {
            if let Some(event) = self.state.buffer.lock().await.pop_front() {
                return event;
            }
            self.state.notify.notified().await;
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }
}

pub struct EventBus {
    subscribers: Mutex<std::collections::HashMap<u64, Arc<SubscriberState>>>,
    next_id: AtomicU64,
    buffer_depth: usize,
}

impl EventBus {
    pub fn new(buffer_depth: usize) -> Self {
        Self {
            subscribers: Mutex::new(std::collections::HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer_depth,
        }
    }

    pub async fn subscribe(&self, kinds: Option<HashSet<EventKind>>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(SubscriberState {
            kinds,
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            depth: self.buffer_depth,
            dropped: AtomicU64::new(0),
        });
        self.subscribers.lock().await.insert(id, Arc::clone(&state));
        Subscription { id, state }
    }

    pub async fn unsubscribe(&self, token: u64) {
        self.subscribers.lock().await.remove(&token);
    }

    pub async fn publish(&self, event: Event) {
        let subscribers = self.subscribers.lock().await;
        for state in subscribers.values() {
            if state.wants(event.kind) {
                state.push(event.clone()).await;
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_subscribe_round_trip() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe(None).await;
        bus.publish(Event::new(EventKind::Test, json!({"n": 1}))).await;
        let event = sub.recv().await;
        assert_eq!(event.kind, EventKind::Test);
    }

    #[tokio::test]
    async fn item_updated_coalesces_same_item() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe(None).await;
        bus.publish(Event::for_item(EventKind::ItemUpdated, "a", json!({"pct": 10}))).await;
        bus.publish(Event::for_item(EventKind::ItemUpdated, "a", json!({"pct": 20}))).await;
        bus.publish(Event::for_item(EventKind::ItemUpdated, "b", json!({"pct": 5}))).await;
        let first = sub.recv().await;
        assert_eq!(first.payload["pct"], 20);
        let second = sub.recv().await;
        assert_eq!(second.item_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn full_buffer_drops_oldest_and_counts_it() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe(None).await;
        bus.publish(Event::new(EventKind::LogInfo, json!("one"))).await;
        bus.publish(Event::new(EventKind::LogInfo, json!("two"))).await;
        bus.publish(Event::new(EventKind::LogInfo, json!("three"))).await;
        assert_eq!(sub.dropped_count(), 1);
        let first = sub.recv().await;
        assert_eq!(first.payload, json!("two"));
    }

    #[tokio::test]
    async fn subscriber_filters_by_kind() {
        let bus = EventBus::new(16);
        let mut kinds = HashSet::new();
        kinds.insert(EventKind::LogError);
        let mut sub = bus.subscribe(Some(kinds)).await;
        bus.publish(Event::new(EventKind::LogInfo, json!("ignored"))).await;
        bus.publish(Event::new(EventKind::LogError, json!("kept"))).await;
        let event = sub.recv().await;
        assert_eq!(event.kind, EventKind::LogError);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new(16);
        let sub = bus.subscribe(None).await;
        let token = sub.token();
        bus.unsubscribe(token).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }
}
