//! Read-path response cache for event log queries.
//!
//! [`CachedEventLog`] decorates any [`EventLogStore`] with cache-aside reads.
//! Every write invalidates the whole `logs:` key space before returning, so
//! a read issued after a write never observes a list that predates it. A
//! read that raced a write does not populate the cache. The cache is
//! strictly best-effort: failures are logged and the store is consulted
//! directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::error::CoreError;
use beacon_core::types::Timestamp;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::models::event_log::{EventLog, NewEventLog};
use crate::store::{AppendOutcome, EventLogStore, LogQuery, LOG_CACHE_PREFIX};

/// Default time-to-live for cached log query results.
pub const DEFAULT_LOG_CACHE_TTL: Duration = Duration::from_secs(600);

/// Default upper bound on live entries in a [`TtlCache`].
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cached value could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Key/value cache with per-entry TTL and prefix invalidation.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Drop every entry whose key starts with `prefix`.
    async fn invalidate_prefix(&self, prefix: &str) -> Result<(), CacheError>;
}

// ---------------------------------------------------------------------------
// In-process cache
// ---------------------------------------------------------------------------

/// In-process [`ResponseCache`].
///
/// Expired entries are dropped on read and swept on every write. When the
/// map is full the entry closest to expiry is evicted.
pub struct TtlCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    max_entries: usize,
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ResponseCache for TtlCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires_at)) if *expires_at > now => return Ok(Some(value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|(_, expires_at)| *expires_at <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expires_at)| *expires_at > now);

        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            let soonest = entries
                .iter()
                .min_by_key(|(_, (_, expires_at))| *expires_at)
                .map(|(key, _)| key.clone());
            if let Some(soonest) = soonest {
                entries.remove(&soonest);
            }
        }
        entries.insert(key.to_string(), (value, now + ttl));
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<(), CacheError> {
        self.entries
            .write()
            .await
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cache-aside decorator
// ---------------------------------------------------------------------------

/// [`EventLogStore`] decorator adding cache-aside reads.
///
/// With no cache configured every call passes straight through.
pub struct CachedEventLog {
    inner: Arc<dyn EventLogStore>,
    cache: Option<Arc<dyn ResponseCache>>,
    ttl: Duration,
    /// Bumped by every invalidation. A read only populates the cache if no
    /// invalidation happened while it was reading the store.
    generation: RwLock<u64>,
}

impl CachedEventLog {
    pub fn new(
        inner: Arc<dyn EventLogStore>,
        cache: Option<Arc<dyn ResponseCache>>,
        ttl: Duration,
    ) -> Self {
        Self {
            inner,
            cache,
            ttl,
            generation: RwLock::new(0),
        }
    }

    async fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            let mut generation = self.generation.write().await;
            *generation += 1;
            if let Err(e) = cache.invalidate_prefix(LOG_CACHE_PREFIX).await {
                tracing::warn!(error = %e, "Failed to invalidate log cache");
            }
        }
    }

    /// Store `logs` under `key` unless an invalidation ran since `read_at`.
    async fn populate(
        &self,
        cache: &dyn ResponseCache,
        key: &str,
        read_at: u64,
        logs: &[EventLog],
    ) {
        let raw = match serde_json::to_string(logs) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to serialize logs for cache");
                return;
            }
        };
        // Held across the write so an invalidation cannot slip in between
        // the check and the set.
        let generation = self.generation.read().await;
        if *generation != read_at {
            tracing::debug!(key, "Log cache write skipped after concurrent invalidation");
            return;
        }
        if let Err(e) = cache.set(key, raw, self.ttl).await {
            tracing::warn!(key, error = %e, "Log cache write failed");
        }
    }

    async fn cached(&self, cache: &dyn ResponseCache, key: &str) -> Option<Vec<EventLog>> {
        let raw = match cache.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "Log cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(logs) => Some(logs),
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding undecodable log cache entry");
                None
            }
        }
    }
}

#[async_trait]
impl EventLogStore for CachedEventLog {
    async fn append(&self, entry: &NewEventLog) -> Result<EventLog, CoreError> {
        let log = self.inner.append(entry).await?;
        self.invalidate().await;
        Ok(log)
    }

    async fn append_once(
        &self,
        entry: &NewEventLog,
        idempotency_key: &str,
    ) -> Result<AppendOutcome, CoreError> {
        let outcome = self.inner.append_once(entry, idempotency_key).await?;
        if outcome.is_inserted() {
            self.invalidate().await;
        }
        Ok(outcome)
    }

    async fn query(&self, query: &LogQuery) -> Result<Vec<EventLog>, CoreError> {
        let Some(cache) = &self.cache else {
            return self.inner.query(query).await;
        };

        let key = query.cache_key();
        if let Some(logs) = self.cached(cache.as_ref(), &key).await {
            tracing::debug!(key, count = logs.len(), "Log cache hit");
            return Ok(logs);
        }

        let read_at = *self.generation.read().await;
        let logs = self.inner.query(query).await?;
        self.populate(cache.as_ref(), &key, read_at, &logs).await;
        Ok(logs)
    }

    async fn archive_older_than(
        &self,
        age: chrono::Duration,
        as_of: Timestamp,
    ) -> Result<u64, CoreError> {
        let count = self.inner.archive_older_than(age, as_of).await?;
        if count > 0 {
            self.invalidate().await;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::InMemoryStore;

    /// A cache whose every operation fails.
    struct BrokenCache;

    /// Log store whose reads take `delay` to complete.
    struct SlowQueryStore {
        inner: Arc<InMemoryStore>,
        delay: Duration,
    }

    #[async_trait]
    impl EventLogStore for SlowQueryStore {
        async fn append(&self, entry: &NewEventLog) -> Result<EventLog, CoreError> {
            self.inner.append(entry).await
        }

        async fn append_once(
            &self,
            entry: &NewEventLog,
            idempotency_key: &str,
        ) -> Result<AppendOutcome, CoreError> {
            self.inner.append_once(entry, idempotency_key).await
        }

        async fn query(&self, query: &LogQuery) -> Result<Vec<EventLog>, CoreError> {
            let logs = self.inner.query(query).await;
            tokio::time::sleep(self.delay).await;
            logs
        }

        async fn archive_older_than(
            &self,
            age: chrono::Duration,
            as_of: Timestamp,
        ) -> Result<u64, CoreError> {
            EventLogStore::archive_older_than(self.inner.as_ref(), age, as_of).await
        }
    }

    #[async_trait]
    impl ResponseCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn invalidate_prefix(&self, _prefix: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    fn decorated(cache: Option<Arc<dyn ResponseCache>>) -> (Arc<InMemoryStore>, CachedEventLog) {
        let store = Arc::new(InMemoryStore::new());
        let cached = CachedEventLog::new(store.clone(), cache, DEFAULT_LOG_CACHE_TTL);
        (store, cached)
    }

    // -----------------------------------------------------------------------
    // TtlCache
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn ttl_cache_round_trip() {
        let cache = TtlCache::new();
        cache
            .set("logs:a", "[]".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("logs:a").await.unwrap().as_deref(), Some("[]"));
        assert_eq!(cache.get("logs:b").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_cache_expires_entries() {
        let cache = TtlCache::new();
        cache
            .set("logs:a", "[]".into(), Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("logs:a").await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn set_sweeps_expired_entries() {
        let cache = TtlCache::new();
        for i in 0..1000 {
            cache
                .set(&format!("logs:since={i}"), "[]".into(), Duration::from_secs(10))
                .await
                .unwrap();
        }
        assert_eq!(cache.len().await, 1000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        cache
            .set("logs:fresh", "[]".into(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn full_cache_evicts_soonest_expiry() {
        let cache = TtlCache::with_max_entries(2);
        cache.set("logs:a", "1".into(), Duration::from_secs(10)).await.unwrap();
        cache.set("logs:b", "2".into(), Duration::from_secs(60)).await.unwrap();
        cache.set("logs:c", "3".into(), Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("logs:a").await.unwrap(), None);
        assert!(cache.get("logs:b").await.unwrap().is_some());
        assert!(cache.get("logs:c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn invalidate_prefix_keeps_other_keys() {
        let cache = TtlCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("logs:a", "1".into(), ttl).await.unwrap();
        cache.set("logs:b", "2".into(), ttl).await.unwrap();
        cache.set("other", "3".into(), ttl).await.unwrap();
        cache.invalidate_prefix("logs:").await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("other").await.unwrap().is_some());
    }

    // -----------------------------------------------------------------------
    // CachedEventLog
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn second_query_is_served_from_cache() {
        let cache = Arc::new(TtlCache::new());
        let (store, cached) = decorated(Some(cache.clone()));
        cached.append(&NewEventLog::new(1, "manual_test")).await.unwrap();

        let first = cached.query(&LogQuery::default()).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(cache.len().await, 1);

        // Bypass the decorator: the cached list must not see this row.
        store.append(&NewEventLog::new(1, "manual_test")).await.unwrap();
        let second = cached.query(&LogQuery::default()).await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn append_invalidates_cached_queries() {
        let cache = Arc::new(TtlCache::new());
        let (_store, cached) = decorated(Some(cache.clone()));
        cached.append(&NewEventLog::new(1, "manual_test")).await.unwrap();
        assert_eq!(cached.query(&LogQuery::default()).await.unwrap().len(), 1);

        cached.append(&NewEventLog::new(2, "api_fire")).await.unwrap();
        assert_eq!(cached.query(&LogQuery::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_append_once_keeps_cache() {
        let cache = Arc::new(TtlCache::new());
        let (_store, cached) = decorated(Some(cache.clone()));
        let entry = NewEventLog::new(1, "scheduled_fire");
        assert!(cached.append_once(&entry, "1:scheduled:0").await.unwrap().is_inserted());
        cached.query(&LogQuery::default()).await.unwrap();

        let again = cached.append_once(&entry, "1:scheduled:0").await.unwrap();
        assert!(!again.is_inserted());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn archival_invalidates_cached_queries() {
        let cache = Arc::new(TtlCache::new());
        let (_store, cached) = decorated(Some(cache.clone()));
        let old = Utc::now() - chrono::Duration::days(10);
        cached
            .append(&NewEventLog::new(1, "manual_test").at(old))
            .await
            .unwrap();
        assert_eq!(cached.query(&LogQuery::default()).await.unwrap().len(), 1);

        let archived = cached
            .archive_older_than(chrono::Duration::days(7), Utc::now())
            .await
            .unwrap();
        assert_eq!(archived, 1);
        assert!(cached.query(&LogQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn read_racing_a_write_is_not_cached() {
        let store = Arc::new(InMemoryStore::new());
        let slow = Arc::new(SlowQueryStore {
            inner: store.clone(),
            delay: Duration::from_millis(200),
        });
        let cache = Arc::new(TtlCache::new());
        let cached = Arc::new(CachedEventLog::new(
            slow,
            Some(cache.clone()),
            DEFAULT_LOG_CACHE_TTL,
        ));
        cached.append(&NewEventLog::new(1, "manual_test")).await.unwrap();

        let reader = {
            let cached = cached.clone();
            tokio::spawn(async move { cached.query(&LogQuery::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cached.append(&NewEventLog::new(1, "api_fire")).await.unwrap();

        // The in-flight read saw only the first row and must not be cached.
        assert_eq!(reader.await.unwrap().unwrap().len(), 1);
        assert!(cache.is_empty().await);
        assert_eq!(cached.query(&LogQuery::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failing_cache_falls_back_to_store() {
        let (_store, cached) = decorated(Some(Arc::new(BrokenCache)));
        cached.append(&NewEventLog::new(1, "manual_test")).await.unwrap();
        cached.append(&NewEventLog::new(1, "api_fire")).await.unwrap();
        let logs = cached.query(&LogQuery::default()).await.unwrap();
        assert_eq!(logs.len(), 2);
    }

    #[tokio::test]
    async fn no_cache_passes_through() {
        let (_store, cached) = decorated(None);
        cached.append(&NewEventLog::new(1, "manual_test")).await.unwrap();
        assert_eq!(cached.query(&LogQuery::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_errors_are_not_masked_by_cache() {
        let cache = Arc::new(TtlCache::new());
        let (store, cached) = decorated(Some(cache));
        store.set_unavailable(true);
        let err = cached.query(&LogQuery::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::StoreUnavailable(_)));
    }
}
