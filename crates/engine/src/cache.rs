//! Idempotent result cache.
//!
//! Successful node logs are stored under `"{instance_id}:{node_id}"`. When a
//! run is re-executed with the same instance id, nodes found here are not
//! dispatched to their processor again.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::models::WorkflowExecutionLog;

/// Cache key for one node of one run.
pub fn idempotency_key(instance_id: &str, node_id: &str) -> String {
    format!("{instance_id}:{node_id}")
}

/// Storage for completed node outcomes.
///
/// Implementations must tolerate concurrent calls from every member of a
/// wave and from concurrent runs. Eviction is the implementation's business.
#[async_trait]
pub trait IdempotentCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<WorkflowExecutionLog>;

    async fn put(&self, key: &str, value: WorkflowExecutionLog);

    /// Forget an entry so the node runs again on the next attempt.
    async fn remove(&self, key: &str) -> Option<WorkflowExecutionLog>;
}

struct CacheEntry {
    value: WorkflowExecutionLog,
    inserted_at: Instant,
}

/// Process-local [`IdempotentCache`] with optional TTL and capacity.
#[derive(Default)]
pub struct InMemoryIdempotentCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Option<Duration>,
    capacity: Option<usize>,
}

impl InMemoryIdempotentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries older than `ttl` are treated as absent.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Keep at most `capacity` entries; the oldest is evicted first.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.duration_since(entry.inserted_at) >= ttl)
    }
}

#[async_trait]
impl IdempotentCache for InMemoryIdempotentCache {
    async fn get(&self, key: &str) -> Option<WorkflowExecutionLog> {
        let now = Instant::now();
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match entries.get(key) {
                None => return None,
                Some(entry) if !self.is_expired(entry, now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // Expired: drop it so the map doesn't grow with dead entries.
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries
            .get(key)
            .is_some_and(|entry| self.is_expired(entry, now))
        {
            entries.remove(key);
        }
        None
    }

    async fn put(&self, key: &str, value: WorkflowExecutionLog) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        if let Some(capacity) = self.capacity {
            if !entries.contains_key(key) && entries.len() >= capacity {
                if let Some(ttl) = self.ttl {
                    entries.retain(|_, e| now.duration_since(e.inserted_at) < ttl);
                }
                if entries.len() >= capacity {
                    let oldest = entries
                        .iter()
                        .min_by_key(|(_, e)| e.inserted_at)
                        .map(|(k, _)| k.clone());
                    if let Some(oldest) = oldest {
                        entries.remove(&oldest);
                    }
                }
            }
        }

        entries.insert(
            key.to_owned(),
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
    }

    async fn remove(&self, key: &str) -> Option<WorkflowExecutionLog> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .map(|entry| entry.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(node: &str) -> WorkflowExecutionLog {
        WorkflowExecutionLog::success(node, "run-1")
    }

    #[test]
    fn key_joins_instance_and_node() {
        assert_eq!(idempotency_key("run-1", "extract"), "run-1:extract");
    }

    #[tokio::test]
    async fn put_then_get_returns_same_log() {
        let cache = InMemoryIdempotentCache::new();
        let entry = log("a");
        cache.put("run-1:a", entry.clone()).await;

        assert_eq!(cache.get("run-1:a").await, Some(entry));
        assert_eq!(cache.get("run-2:a").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_dropped() {
        let cache = InMemoryIdempotentCache::new().with_ttl(Duration::from_secs(60));
        cache.put("k", log("a")).await;

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cache.get("k").await.is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_evicts_oldest() {
        let cache = InMemoryIdempotentCache::new().with_capacity(2);
        cache.put("first", log("a")).await;
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.put("second", log("b")).await;
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.put("third", log("c")).await;

        assert_eq!(cache.len(), 2);
        assert!(cache.get("first").await.is_none());
        assert!(cache.get("second").await.is_some());
        assert!(cache.get("third").await.is_some());
    }

    #[tokio::test]
    async fn remove_forgets_entry() {
        let cache = InMemoryIdempotentCache::new();
        cache.put("k", log("a")).await;
        assert!(cache.remove("k").await.is_some());
        assert!(cache.get("k").await.is_none());
    }
}
