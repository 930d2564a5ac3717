//! Tenant-scoped, TTL-based cache of formatted results.
//!
//! Keys are `{key_prefix}:{namespace}:{blake3(namespace, question, params)}`,
//! so one tenant's entries can be dropped by prefix without touching any
//! other tenant's. Read and write failures are logged and treated as
//! misses; a failed invalidation is returned to the caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use graphmind_core::{FormattedResult, QueryParams, TemplateKind, TenantNamespace};
use graphmind_graph::{KvClient, PoolError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(#[from] PoolError),

    #[error("Cache entry is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Key/value store with TTL and prefix deletion.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Delete every key starting with `prefix`; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

/// Every this many writes, [`MemoryCacheStore`] sweeps out expired entries.
const PRUNE_EVERY: usize = 256;

/// In-process store. Expired entries are dropped on read and swept
/// periodically on write, so keys that are never read again do not pile up.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, (String, Instant)>,
    writes: AtomicUsize,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires)| *expires > now);
        let dropped = before.saturating_sub(self.entries.len());
        if dropped > 0 {
            tracing::debug!(dropped, remaining = self.entries.len(), "Expired cache entries purged");
        }
        dropped
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.1 > now => return Ok(Some(entry.0.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_EVERY == 0 {
            self.purge_expired();
        }
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}

/// Redis-compatible store over the graph pool's wire codec.
pub struct RespCacheStore {
    kv: KvClient,
}

impl RespCacheStore {
    pub fn new(kv: KvClient) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl CacheStore for RespCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.kv.get(key).await?)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        Ok(self.kv.set_ex(key, &value, ttl).await?)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        Ok(self.kv.delete_prefix(prefix).await?)
    }
}

/// What a cache entry holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub payload: FormattedResult,
    pub template_used: TemplateKind,
    pub cached_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

#[derive(Clone)]
pub struct QueryCache {
    store: Arc<dyn CacheStore>,
    key_prefix: String,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(store: Arc<dyn CacheStore>, key_prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Prefix shared by every key of one tenant.
    pub fn namespace_prefix(&self, namespace: &TenantNamespace) -> String {
        format!("{}:{}:", self.key_prefix, namespace)
    }

    pub fn key(&self, namespace: &TenantNamespace, question: &str, params: &QueryParams) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(namespace.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(normalize_question(question).as_bytes());
        hasher.update(&[0]);
        // BTreeMap-backed, so serialization order is stable.
        hasher.update(serde_json::to_string(params).unwrap_or_default().as_bytes());
        format!("{}{}", self.namespace_prefix(namespace), hasher.finalize().to_hex())
    }

    /// Look up a result. Errors and corrupt entries are misses.
    pub async fn get(
        &self,
        namespace: &TenantNamespace,
        question: &str,
        params: &QueryParams,
    ) -> Option<CacheEntry> {
        let key = self.key(namespace, question, params);
        let raw = match self.store.get(&key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(namespace = %namespace, error = %e, "Cache read failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(namespace = %namespace, key = %key, error = %e, "Corrupt cache entry ignored");
                None
            }
        }
    }

    /// Store a result under the default TTL. Failures are logged only.
    pub async fn put(
        &self,
        namespace: &TenantNamespace,
        question: &str,
        params: &QueryParams,
        payload: &FormattedResult,
    ) {
        let entry = CacheEntry {
            payload: payload.clone(),
            template_used: payload.metadata.template_used,
            cached_at: Utc::now(),
            ttl_secs: self.ttl.as_secs(),
        };
        let key = self.key(namespace, question, params);
        let result = match serde_json::to_string(&entry) {
            Ok(raw) => self.store.set(&key, raw, self.ttl).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(namespace = %namespace, error = %e, "Cache write failed");
        }
    }

    /// Drop every entry of one tenant. Returns the number removed.
    ///
    /// Unlike reads and writes, a backend failure is returned, never counted as zero.
    pub async fn invalidate_namespace(&self, namespace: &TenantNamespace) -> Result<u64, CacheError> {
        match self.store.delete_prefix(&self.namespace_prefix(namespace)).await {
            Ok(count) => {
                tracing::info!(namespace = %namespace, dropped = count, "Cache invalidated");
                Ok(count)
            }
            Err(e) => {
                tracing::error!(namespace = %namespace, error = %e, "Cache invalidation failed");
                Err(e)
            }
        }
    }
}

/// Lowercase, trim, strip terminal punctuation, collapse whitespace.
pub fn normalize_question(question: &str) -> String {
    let lowered = question.trim().to_lowercase();
    let stripped = lowered.trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmind_core::ResultMetadata;

    fn ns(s: &str) -> TenantNamespace {
        TenantNamespace::new(s).unwrap()
    }

    fn result(count: i64) -> FormattedResult {
        FormattedResult {
            entities: vec![],
            relationships: vec![],
            metadata: ResultMetadata {
                entity_count: 0,
                relationship_count: 0,
                execution_time_ms: 1.5,
                cached: false,
                template_used: TemplateKind::CountQuery,
                count: Some(count),
                aggregates: vec![],
            },
        }
    }

    fn cache() -> (Arc<MemoryCacheStore>, QueryCache) {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = QueryCache::new(store.clone(), "graphmind:query", Duration::from_secs(3600));
        (store, cache)
    }

    #[test]
    fn test_normalize_question() {
        assert_eq!(normalize_question("  Who is   Sarah?! "), "who is sarah");
        assert_eq!(normalize_question("WHO IS SARAH"), "who is sarah");
        assert_eq!(normalize_question("?"), "");
    }

    #[test]
    fn test_keys_are_tenant_scoped() {
        let (_, cache) = cache();
        let params = QueryParams::new();
        let a = cache.key(&ns("alice"), "Who is Sarah?", &params);
        let b = cache.key(&ns("bob"), "Who is Sarah?", &params);
        assert!(a.starts_with("graphmind:query:alice:"));
        assert!(b.starts_with("graphmind:query:bob:"));
        assert_ne!(a[a.rfind(':').unwrap()..], b[b.rfind(':').unwrap()..]);

        // Near-duplicate phrasing shares a key; parameters do not.
        assert_eq!(a, cache.key(&ns("alice"), "who is   sarah", &params));
        let mut limited = QueryParams::new();
        limited.insert("limit".into(), serde_json::json!(5));
        assert_ne!(a, cache.key(&ns("alice"), "Who is Sarah?", &limited));
    }

    #[tokio::test]
    async fn test_put_get_and_invalidate() {
        let (store, cache) = cache();
        let params = QueryParams::new();
        cache.put(&ns("alice"), "How many people?", &params, &result(3)).await;
        cache.put(&ns("alice"), "How many projects?", &params, &result(4)).await;
        cache.put(&ns("alice-2"), "How many people?", &params, &result(5)).await;

        let hit = cache.get(&ns("alice"), "how many people", &params).await.unwrap();
        assert_eq!(hit.payload.metadata.count, Some(3));
        assert_eq!(hit.template_used, TemplateKind::CountQuery);
        assert_eq!(hit.ttl_secs, 3600);

        assert_eq!(cache.invalidate_namespace(&ns("alice")).await.unwrap(), 2);
        assert!(cache.get(&ns("alice"), "How many people?", &params).await.is_none());
        assert!(cache.get(&ns("alice-2"), "How many people?", &params).await.is_some());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_entries_miss() {
        let store = MemoryCacheStore::new();
        store.set("k", "v".into(), Duration::from_millis(0)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unread_expired_entries_are_swept() {
        let store = MemoryCacheStore::new();
        store.set("live", "v".into(), Duration::from_secs(60)).await.unwrap();
        for i in 0..1000 {
            store.set(&format!("gone:{i}"), "v".into(), Duration::ZERO).await.unwrap();
        }
        // Swept on write without any of the expired keys being read.
        assert!(store.len() < PRUNE_EVERY + 1, "len {}", store.len());

        store.purge_expired();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("live").await.unwrap(), Some("v".into()));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let (store, cache) = cache();
        let params = QueryParams::new();
        let key = cache.key(&ns("alice"), "q", &params);
        store.set(&key, "not json".into(), Duration::from_secs(60)).await.unwrap();
        assert!(cache.get(&ns("alice"), "q", &params).await.is_none());
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
            Err(PoolError::Unavailable("down".into()).into())
        }

        async fn set(&self, _: &str, _: String, _: Duration) -> Result<(), CacheError> {
            Err(PoolError::Unavailable("down".into()).into())
        }

        async fn delete_prefix(&self, _: &str) -> Result<u64, CacheError> {
            Err(PoolError::Unavailable("down".into()).into())
        }
    }

    #[tokio::test]
    async fn test_backend_failure_fails_open_for_reads() {
        let cache = QueryCache::new(Arc::new(BrokenStore), "p", Duration::from_secs(1));
        let params = QueryParams::new();
        assert!(cache.get(&ns("alice"), "q", &params).await.is_none());
        cache.put(&ns("alice"), "q", &params, &result(1)).await;
    }

    #[tokio::test]
    async fn test_failed_invalidation_is_reported() {
        let cache = QueryCache::new(Arc::new(BrokenStore), "p", Duration::from_secs(1));
        let err = cache.invalidate_namespace(&ns("alice")).await.unwrap_err();
        assert!(matches!(err, CacheError::Backend(PoolError::Unavailable(_))));
    }
}
