//! C8 — Result Cache: TTL + upsert cache keyed by the 32-hex digest from
//! [`crate::utils::compute_cache_key`], with at-most-one-concurrent-compute
//! per key. Storage is `moka`'s async cache (as in the `query-cache.rs`
//! retrieval example); the single-flight guard is a per-key keyed mutex kept
//! in a `DashMap`, the same lock-free get-or-create idiom
//! `mysql_pool_manager.rs` uses for its pool-per-key table.

use dashmap::DashMap;
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::models::{CacheEntry, CacheStats, QueryResult};

pub struct ResultCache {
    store: Cache<String, CacheEntry>,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let store = Cache::builder().max_capacity(max_entries).build();
        Self { store, inflight: DashMap::new(), ttl, hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    /// A plain `get` — returns `None` on miss or on an expired entry (which
    /// is also evicted), per the cache's TTL semantics. Callers wanting
    /// single-flight behavior should use [`ResultCache::get_or_compute`].
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = chrono::Utc::now();
        match self.store.get(key).await {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let mut updated = entry.clone();
                updated.hit_count += 1;
                updated.last_access = now;
                self.store.insert(key.to_string(), updated.clone()).await;
                Some(updated)
            },
            Some(_expired) => {
                self.store.invalidate(key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            },
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            },
        }
    }

    /// Upsert: if the key exists, bump `hit_count`/`last_access` and replace
    /// the payload; otherwise insert a fresh entry with `hit_count = 1`.
    pub async fn put(&self, key: String, normalized_query: String, payload: QueryResult) {
        let now = chrono::Utc::now();
        let hit_count = match self.store.get(&key).await {
            Some(existing) => existing.hit_count + 1,
            None => 1,
        };
        let entry = CacheEntry {
            key: key.clone(),
            normalized_query,
            payload,
            expires_at: now + chrono::Duration::from_std(self.ttl).unwrap_or_default(),
            hit_count,
            last_access: now,
        };
        self.store.insert(key, entry).await;
    }

    /// At-most-one-concurrent-compute: on a miss, the first caller for a key
    /// runs `compute` while later callers for the same key wait on the same
    /// lock and then re-check the now-populated cache.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        normalized_query: &str,
        compute: F,
    ) -> Result<QueryResult, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<QueryResult, E>>,
    {
        if let Some(entry) = self.get(key).await {
            return Ok(entry.payload);
        }

        let lock = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-check: another caller may have computed and stored the value
        // while we waited for the lock.
        if let Some(entry) = self.get(key).await {
            self.inflight.remove_if(key, |_, v| Arc::ptr_eq(v, &lock));
            return Ok(entry.payload);
        }

        let result = compute().await;
        if let Ok(value) = &result {
            self.put(key.to_string(), normalized_query.to_string(), value.clone()).await;
        }
        self.inflight.remove_if(key, |_, v| Arc::ptr_eq(v, &lock));
        result
    }

    /// Removes any entry whose normalized query contains `pattern`.
    pub async fn invalidate(&self, pattern: &str) {
        let keys: Vec<String> = self
            .store
            .iter()
            .filter(|(_, entry)| entry.normalized_query.contains(pattern))
            .map(|(k, _)| (*k).clone())
            .collect();
        for key in keys {
            self.store.invalidate(&key).await;
        }
    }

    /// Periodic sweep; `moka` already evicts lazily on access, so this just
    /// forces a synchronization pass (cheap, bounded by entry count).
    pub async fn cleanup(&self) {
        self.store.run_pending_tasks().await;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.store.entry_count(),
            approx_bytes: self.store.weighted_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Intent, IntentKind, PageInfo, SqlArtifact, SqlSource};
    use std::collections::BTreeMap;

    fn fixture_result() -> QueryResult {
        QueryResult {
            rows: vec![],
            row_count: 0,
            execution_time_ms: 1,
            strategy_used: "rule_only".to_string(),
            sql_artifact: SqlArtifact {
                sql: "SELECT 1".to_string(),
                parameters: BTreeMap::new(),
                explanation: "fixture".to_string(),
                confidence: 0.8,
                source: SqlSource::Rule,
            },
            intent: Intent::new(IntentKind::SimpleQuery),
            highlighted: false,
            page_info: PageInfo::compute(0, 100, 0),
        }
    }

    #[tokio::test]
    async fn put_then_get_increments_hit_count() {
        let cache = ResultCache::new(Duration::from_secs(300), 1000);
        cache.put("k1".to_string(), "q".to_string(), fixture_result()).await;
        let first = cache.get("k1").await.unwrap();
        assert_eq!(first.hit_count, 2);
        let second = cache.get("k1").await.unwrap();
        assert_eq!(second.hit_count, 3);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = ResultCache::new(Duration::from_millis(1), 1000);
        cache.put("k1".to_string(), "q".to_string(), fixture_result()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("k1").await.is_none());
    }

    #[tokio::test]
    async fn invalidate_matches_on_normalized_query_substring() {
        let cache = ResultCache::new(Duration::from_secs(300), 1000);
        cache.put("k1".to_string(), "customers named kim".to_string(), fixture_result()).await;
        cache.put("k2".to_string(), "products over 100".to_string(), fixture_result()).await;
        cache.invalidate("customers").await;
        assert!(cache.get("k1").await.is_none());
        assert!(cache.get("k2").await.is_some());
    }

    #[tokio::test]
    async fn get_or_compute_runs_once_for_concurrent_misses() {
        let cache = Arc::new(ResultCache::new(Duration::from_secs(300), 1000));
        let calls = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("shared-key", "q", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, ()>(fixture_result())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
