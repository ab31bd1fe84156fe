//! Info Extractor Cache.
//!
//! A bounded, TTL'd cache from `(url, preset, cli_tokens)` to extractor
//! metadata, with single-flight coalescing: concurrent callers for the same
//! key share one computation rather than each re-running the extractor.
//! `moka::future::Cache` backs the bounded/TTL storage; `dashmap` tracks
//! in-flight computations as an explicit key → broadcast-sender map.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use moka::future::Cache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub status: HitOrMiss,
    pub ttl_secs: u64,
    pub ttl_left_secs: u64,
    pub expires_at: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HitOrMiss {
    Hit,
    Miss,
}

#[derive(Clone)]
struct Entry<V> {
    value: V,
    expires_at: SystemTime,
    ttl: Duration,
}

pub struct InfoCache<V: Clone + Send + Sync + 'static> {
    cache: Cache<String, Entry<V>>,
    in_flight: DashMap<String, broadcast::Sender<Result<V, String>>>,
}

pub fn cache_key(url: &str, preset: &str, cli_tokens: &[String]) -> String {
    let mut sorted = cli_tokens.to_vec();
    sorted.sort();
    let canonical = format!("{url}||{preset}||{}", sorted.join(" "));
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl<V: Clone + Send + Sync + 'static> InfoCache<V> {
    pub fn new(max_entries: u64, default_ttl: Duration) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_entries).time_to_live(default_ttl).build(),
            in_flight: DashMap::new(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<(V, CacheStatus)> {
        let entry = self.cache.get(key).await?;
        let now = SystemTime::now();
        let ttl_left = entry.expires_at.duration_since(now).unwrap_or(Duration::ZERO);
        Some((
            entry.value,
            CacheStatus {
                status: HitOrMiss::Hit,
                ttl_secs: entry.ttl.as_secs(),
                ttl_left_secs: ttl_left.as_secs(),
                expires_at: entry.expires_at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
            },
        ))
    }

    pub async fn put(&self, key: String, value: V, ttl: Duration) {
        let expires_at = SystemTime::now() + ttl;
        self.cache.insert(key, Entry { value, expires_at, ttl }).await;
    }

    /// Evicts `key` immediately, so the next `get_or_compute` call is a
    /// forced miss.
    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Coalesces concurrent computations for the same key: only the first
    /// caller runs `compute`, everyone else awaits its result.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<(V, CacheStatus), String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, String>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }

        // Fast path: someone else is already computing this key.
        if let Some(sender) = self.in_flight.get(key).map(|s| s.clone()) {
            let mut rx = sender.subscribe();
            return self.await_in_flight(&mut rx, ttl).await;
        }

        let (tx, mut rx) = broadcast::channel(1);
        match self.in_flight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                let mut rx = occupied.get().subscribe();
                return self.await_in_flight(&mut rx, ttl).await;
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(tx.clone());
            }
        }

        let result = compute().await;
        self.in_flight.remove(key);
        let _ = tx.send(result.clone());
        if let Ok(value) = &result {
            self.put(key.to_string(), value.clone(), ttl).await;
        }
        result.map(|v| {
            (
                v,
                CacheStatus {
                    status: HitOrMiss::Miss,
                    ttl_secs: ttl.as_secs(),
                    ttl_left_secs: ttl.as_secs(),
                    expires_at: (SystemTime::now() + ttl).duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
                },
            )
        })
    }

    async fn await_in_flight(
        &self,
        rx: &mut broadcast::Receiver<Result<V, String>>,
        ttl: Duration,
    ) -> Result<(V, CacheStatus), String> {
        match rx.recv().await {
            Ok(Ok(value)) => Ok((
                value,
                CacheStatus {
                    status: HitOrMiss::Miss,
                    ttl_secs: ttl.as_secs(),
                    ttl_left_secs: ttl.as_secs(),
                    expires_at: (SystemTime::now() + ttl).duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
                },
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err("in-flight computation was dropped before completing".to_string()),
        }
    }
}

pub type SharedInfoCache<V> = Arc<InfoCache<V>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cache_key_is_order_independent_over_cli_tokens() {
        let a = cache_key("u", "p", &["--a".into(), "--b".into()]);
        let b = cache_key("u", "p", &["--b".into(), "--a".into()]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn get_or_compute_runs_compute_once_for_concurrent_callers() {
        let cache: InfoCache<i32> = InfoCache::new(100, Duration::from_secs(60));
        let cache = Arc::new(cache);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("k", Duration::from_secs(60), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<i32, String>(42)
                    })
                    .await
            }));
        }
        for h in handles {
            let (value, _status) = h.await.unwrap().unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_second_call_after_completion_is_a_cache_hit() {
        let cache: InfoCache<i32> = InfoCache::new(100, Duration::from_secs(60));
        let (value, status) =
            cache.get_or_compute("k", Duration::from_secs(60), || async { Ok::<i32, String>(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(matches!(status.status, HitOrMiss::Miss));

        let (value2, status2) =
            cache.get_or_compute("k", Duration::from_secs(60), || async { Ok::<i32, String>(999) }).await.unwrap();
        assert_eq!(value2, 7);
        assert!(matches!(status2.status, HitOrMiss::Hit));
    }
}
