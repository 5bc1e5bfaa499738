//! Cache Entry and Popular Query — C8's owned state and C11's aggregates.

use super::QueryResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Kept alongside `key` (a digest) so `invalidate(pattern)` has
    /// something substring-matchable to search.
    pub normalized_query: String,
    pub payload: QueryResult,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
    pub last_access: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
    pub approx_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PopularQuery {
    pub normalized_query: String,
    pub count: i64,
    pub last_seen: DateTime<Utc>,
    pub avg_response_time: f64,
    pub success_rate: f64,
}
