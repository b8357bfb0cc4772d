//! Result cache.
//!
//! The stream service only depends on the [`StreamCache`] contract:
//! `set(key, value, ttl)` followed by `get(key)` returns the value until the
//! ttl elapses, then misses. [`MemoryCache`] is the in-process
//! implementation; expired entries are dropped on read and by a periodic
//! sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::request::MediaType;
use crate::stream::orchestrator::AggregatedResult;

/// Key/value store with expiry for aggregated results.
#[async_trait]
pub trait StreamCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<AggregatedResult>;
    async fn set(&self, key: &str, value: AggregatedResult, ttl: Duration);
}

/// How long results live, per media type. `None` disables caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub movie_ttl: Option<Duration>,
    pub series_ttl: Option<Duration>,
}

impl CachePolicy {
    #[must_use]
    pub fn ttl_for(&self, media_type: MediaType) -> Option<Duration> {
        match media_type {
            MediaType::Movie => self.movie_ttl,
            MediaType::Series => self.series_ttl,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            movie_ttl: Some(Duration::from_secs(2 * 60 * 60)),
            series_ttl: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: AggregatedResult,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory [`StreamCache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Purge expired entries every `interval` until the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired().await;
                if purged > 0 {
                    debug!(purged, "cache sweep");
                }
            }
        })
    }
}

#[async_trait]
impl StreamCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<AggregatedResult> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // expired: drop it unless a fresh value was written meanwhile
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        None
    }

    async fn set(&self, key: &str, value: AggregatedResult, ttl: Duration) {
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }
}
