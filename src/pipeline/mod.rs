//! C7 — Pipeline Controller: drives the nine-stage sequence, emits events
//! onto a per-request broadcast bus that C12 taps, and enforces the
//! per-request deadline cumulatively across stages.

pub mod events;

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::analytics::{AnalyticsRecord, AnalyticsRecorder};
use crate::cache::ResultCache;
use crate::config::Config;
use crate::error::PipelineError;
use crate::formatter::ResultFormatter;
use crate::intent::IntentClassifier;
use crate::models::{PipelineEvent, QueryRequest, QueryResult, SqlArtifact, Stage, Strategy};
use crate::retry::RetryPolicy;
use crate::runner::QueryExecutor;
use crate::scheduler::StrategyScheduler;
use crate::sql::{SqlGenerator, SqlValidator};
use crate::utils::compute_cache_key;

/// Per-stage durations measured by [`PipelineController::compute`], carried
/// alongside its `Result` so a failed run still reports whatever it managed
/// to measure before erroring out.
#[derive(Debug, Clone, Copy, Default)]
struct StageTimings {
    sql_gen_ms: u64,
    sql_exec_ms: u64,
}

pub struct PipelineController {
    pub config: Arc<Config>,
    pub intent_classifier: IntentClassifier,
    pub rule_generator: Arc<dyn SqlGenerator>,
    pub llm_generator: Arc<dyn SqlGenerator>,
    pub validator: SqlValidator,
    pub runner: Arc<dyn QueryExecutor>,
    pub formatter: ResultFormatter,
    pub cache: Arc<ResultCache>,
    pub analytics: Arc<AnalyticsRecorder>,
}

impl PipelineController {
    /// Runs one request end-to-end, broadcasting [`PipelineEvent`]s as it
    /// goes. `events` is a sender even when nobody is subscribed (the HTTP
    /// handler just drops the receiver); `cancellation` is cloned into every
    /// suspension point so a client disconnect (C12) or deadline unwinds the
    /// whole request promptly.
    pub async fn run(
        &self,
        request: QueryRequest,
        events: broadcast::Sender<PipelineEvent>,
        cancellation: CancellationToken,
    ) -> Result<QueryResult, PipelineError> {
        let _ = events.send(PipelineEvent::Start);

        let normalized_query = request.normalized();
        let deadline = tokio::time::Instant::now()
            + self.config.effective_timeout(request.options.timeout_seconds);

        let cache_key =
            compute_cache_key(&normalized_query, &request.context, &request.options);
        let use_cache = request.options.use_cache_or_default();

        if use_cache {
            if let Some(entry) = self.cache.get(&cache_key).await {
                let _ = events.send(PipelineEvent::CacheHit);
                let _ = events.send(PipelineEvent::PipelineComplete {
                    result: Box::new(entry.payload.clone()),
                });
                return Ok(entry.payload);
            }
        }

        // A bare `get` miss above doesn't rule out a concurrent identical
        // request already computing; `get_or_compute` re-checks the cache
        // under a per-key lock so the closure below runs at most once per
        // key regardless of how many callers raced in on a miss.
        let timings = std::sync::Mutex::new(StageTimings::default());
        let result = if use_cache {
            self.cache
                .get_or_compute(&cache_key, &normalized_query, || async {
                    let (outcome, measured) = self
                        .compute(&request, &normalized_query, deadline, &events, &cancellation)
                        .await;
                    *timings.lock().unwrap() = measured;
                    outcome
                })
                .await
        } else {
            let (outcome, measured) = self
                .compute(&request, &normalized_query, deadline, &events, &cancellation)
                .await;
            *timings.lock().unwrap() = measured;
            outcome
        };
        let timings = *timings.lock().unwrap();

        match &result {
            Ok(value) => {
                let _ = events
                    .send(PipelineEvent::PipelineComplete { result: Box::new(value.clone()) });
            },
            Err(err) => {
                let _ = events.send(PipelineEvent::Error {
                    kind: err.kind().to_string(),
                    message: if err.is_security() { String::new() } else { err.to_string() },
                });
            },
        }

        self.record_analytics(&request, &normalized_query, &result, timings);

        result
    }

    /// Runs the nine-stage sequence once. Returns the outcome alongside
    /// whatever per-stage timing it managed to measure, even on failure, so
    /// analytics always gets a real `sql_gen_ms`/`sql_exec_ms` breakdown
    /// rather than zeros for anything but a full success.
    async fn compute(
        &self,
        request: &QueryRequest,
        normalized_query: &str,
        deadline: tokio::time::Instant,
        events: &broadcast::Sender<PipelineEvent>,
        cancellation: &CancellationToken,
    ) -> (Result<QueryResult, PipelineError>, StageTimings) {
        let mut timings = StageTimings::default();

        if cancellation.is_cancelled() {
            return (Err(PipelineError::Canceled), timings);
        }

        let _ = events.send(PipelineEvent::StageStart { stage: Stage::Intent });
        let stage_start = std::time::Instant::now();
        let intent = self.intent_classifier.classify(normalized_query);
        let _ = events.send(PipelineEvent::StageEnd {
            stage: Stage::Intent,
            duration_ms: stage_start.elapsed().as_millis() as u64,
        });

        let sql_gen_start = std::time::Instant::now();
        let _ = events.send(PipelineEvent::StageStart { stage: Stage::SqlGen });
        let strategy = request.options.strategy_or_default(default_strategy(&self.config));
        let scheduler = StrategyScheduler::new(
            self.rule_generator.as_ref(),
            self.llm_generator.as_ref(),
            RetryPolicy { max_attempts: self.config.llm.max_retries.max(1), ..Default::default() },
        );

        let artifact = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return (Err(PipelineError::Canceled), timings),
            _ = tokio::time::sleep_until(deadline) => return (Err(PipelineError::Timeout), timings),
            result = scheduler.schedule(&intent, strategy, deadline, cancellation) => result,
        };
        timings.sql_gen_ms = sql_gen_start.elapsed().as_millis() as u64;

        let artifact = match artifact {
            Ok(artifact) => artifact,
            Err(e) => return (Err(PipelineError::GenerationFailed(e.reasons)), timings),
        };
        let _ = events.send(PipelineEvent::StageEnd {
            stage: Stage::SqlGen,
            duration_ms: timings.sql_gen_ms,
        });

        let _ = events.send(PipelineEvent::StageStart { stage: Stage::Validate });
        let verdict = self.validator.validate(&artifact.sql);
        if !verdict.accepted {
            return (Err(PipelineError::Security(verdict.reasons)), timings);
        }
        let _ = events
            .send(PipelineEvent::StageEnd { stage: Stage::Validate, duration_ms: 0 });

        let normalized_artifact = SqlArtifact { sql: verdict.normalized_sql, ..artifact };

        let _ = events.send(PipelineEvent::StageStart { stage: Stage::Execute });
        let sql_exec_start = std::time::Instant::now();
        let limit = request.options.limit_or_default(self.config.pipeline.default_limit);
        let (rows, exec_duration) = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return (Err(PipelineError::Canceled), timings),
            _ = tokio::time::sleep_until(deadline) => return (Err(PipelineError::Timeout), timings),
            result = self.runner.execute(&normalized_artifact, limit) => {
                match result {
                    Ok(ok) => ok,
                    Err(e) => {
                        timings.sql_exec_ms = sql_exec_start.elapsed().as_millis() as u64;
                        return (Err(PipelineError::Runtime(e.to_string())), timings);
                    },
                }
            }
        };
        timings.sql_exec_ms = exec_duration.as_millis() as u64;
        let _ = events.send(PipelineEvent::StageEnd {
            stage: Stage::Execute,
            duration_ms: timings.sql_exec_ms,
        });

        let _ = events.send(PipelineEvent::StageStart { stage: Stage::Format });
        let row_count = rows.len() as u32;
        let highlighting = request.options.enable_highlighting_or_default();
        let (highlighted_rows, was_highlighted) =
            self.formatter.highlight_rows(rows, normalized_query, highlighting);
        let (page, page_info) = self.formatter.paginate(highlighted_rows, 0, limit);
        let _ = events.send(PipelineEvent::StageEnd { stage: Stage::Format, duration_ms: 0 });

        let result = QueryResult {
            rows: page,
            row_count,
            execution_time_ms: timings.sql_gen_ms + timings.sql_exec_ms,
            strategy_used: strategy_label(strategy, normalized_artifact.source),
            sql_artifact: normalized_artifact,
            intent,
            highlighted: was_highlighted,
            page_info,
        };

        (Ok(result), timings)
    }

    fn record_analytics(
        &self,
        request: &QueryRequest,
        normalized_query: &str,
        result: &Result<QueryResult, PipelineError>,
        timings: StageTimings,
    ) {
        let (success, error_kind, response_time_ms, strategy) = match result {
            Ok(value) => (true, None, value.execution_time_ms, value.strategy_used.clone()),
            Err(err) => (
                false,
                Some(err.kind().to_string()),
                timings.sql_gen_ms + timings.sql_exec_ms,
                request
                    .options
                    .strategy_or_default(default_strategy(&self.config))
                    .as_str()
                    .to_string(),
            ),
        };

        self.analytics.record(AnalyticsRecord {
            timestamp: chrono::Utc::now(),
            user_id: request.user_id,
            normalized_query: normalized_query.to_string(),
            strategy,
            success,
            result_count: result.as_ref().map(|r| r.row_count).unwrap_or(0),
            response_time_ms,
            sql_gen_ms: timings.sql_gen_ms,
            sql_exec_ms: timings.sql_exec_ms,
            error_kind,
        });
    }
}

fn default_strategy(config: &Config) -> Strategy {
    match config.pipeline.default_strategy.as_str() {
        "llm_first" => Strategy::LlmFirst,
        "hybrid" => Strategy::Hybrid,
        "llm_only" => Strategy::LlmOnly,
        "rule_only" => Strategy::RuleOnly,
        _ => Strategy::RuleFirst,
    }
}

fn strategy_label(strategy: Strategy, source: crate::models::SqlSource) -> String {
    match strategy {
        Strategy::Hybrid => format!("hybrid:{}", source.as_str()),
        other => other.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, QueryOptions};
    use crate::sql::GenerationError;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::time::Duration as StdDuration;

    struct AlwaysUnavailableLlm;

    #[async_trait]
    impl SqlGenerator for AlwaysUnavailableLlm {
        async fn generate(&self, _intent: &crate::models::Intent) -> Result<SqlArtifact, GenerationError> {
            Err(GenerationError::LlmUnavailable("no provider configured in test".to_string()))
        }
    }

    struct FakeExecutor {
        rows: Vec<BTreeMap<String, serde_json::Value>>,
    }

    #[async_trait]
    impl QueryExecutor for FakeExecutor {
        async fn execute(
            &self,
            _artifact: &SqlArtifact,
            row_cap: u32,
        ) -> Result<(Vec<BTreeMap<String, serde_json::Value>>, std::time::Duration), crate::runner::RunnerError>
        {
            let mut rows = self.rows.clone();
            rows.truncate(row_cap as usize);
            Ok((rows, std::time::Duration::from_millis(1)))
        }
    }

    fn fixture_row(name: &str) -> BTreeMap<String, serde_json::Value> {
        let mut row = BTreeMap::new();
        row.insert("name".to_string(), serde_json::Value::String(name.to_string()));
        row
    }

    fn make_controller(executor: impl QueryExecutor + 'static) -> PipelineController {
        PipelineController {
            config: Arc::new(Config::default()),
            intent_classifier: IntentClassifier::new(),
            rule_generator: Arc::new(crate::sql::RuleSqlGenerator::new()),
            llm_generator: Arc::new(AlwaysUnavailableLlm),
            validator: SqlValidator::new(vec!["customers".to_string()]),
            runner: Arc::new(executor),
            formatter: ResultFormatter::new(),
            cache: Arc::new(ResultCache::new(StdDuration::from_secs(300), 1000)),
            analytics: Arc::new(AnalyticsRecorder::spawn(16, None)),
        }
    }

    fn fixture_request(query: &str) -> QueryRequest {
        QueryRequest {
            query: query.to_string(),
            context: BTreeMap::new(),
            options: QueryOptions { strategy: Some(Strategy::RuleOnly), ..Default::default() },
            user_id: None,
        }
    }

    #[tokio::test]
    async fn end_to_end_rule_only_success_then_cache_hit() {
        let controller = make_controller(FakeExecutor { rows: vec![fixture_row("홍길동")] });
        let request = fixture_request("customers named 홍길동");
        let (sender, _receiver) = broadcast::channel(16);
        let token = CancellationToken::new();

        let first = controller.run(request.clone(), sender.clone(), token.clone()).await.unwrap();
        assert_eq!(first.row_count, 1);
        assert_eq!(first.sql_artifact.source, crate::models::SqlSource::Rule);
        assert!(first.intent.entity(EntityKind::CustomerName).contains(&"홍길동".to_string()));

        let (sender2, mut events2) = broadcast::channel(16);
        let second = controller.run(request, sender2, token).await.unwrap();
        assert_eq!(second.row_count, 1);

        let mut saw_cache_hit = false;
        while let Ok(event) = events2.try_recv() {
            if matches!(event, PipelineEvent::CacheHit) {
                saw_cache_hit = true;
            }
        }
        assert!(saw_cache_hit);
    }

    struct CountingExecutor {
        calls: Arc<std::sync::atomic::AtomicU64>,
    }

    #[async_trait]
    impl QueryExecutor for CountingExecutor {
        async fn execute(
            &self,
            _artifact: &SqlArtifact,
            _row_cap: u32,
        ) -> Result<(Vec<BTreeMap<String, serde_json::Value>>, std::time::Duration), crate::runner::RunnerError>
        {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            // Long enough that every concurrent caller below is guaranteed to
            // have reached the cache miss before the first one finishes.
            tokio::time::sleep(StdDuration::from_millis(50)).await;
            Ok((vec![fixture_row("홍길동")], StdDuration::from_millis(1)))
        }
    }

    #[tokio::test]
    async fn concurrent_identical_misses_invoke_compute_once() {
        let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let controller =
            Arc::new(make_controller(CountingExecutor { calls: calls.clone() }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let controller = controller.clone();
            let request = fixture_request("customers named 홍길동");
            handles.push(tokio::spawn(async move {
                let (sender, _receiver) = broadcast::channel(16);
                controller.run(request, sender, CancellationToken::new()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn generation_failure_never_populates_cache() {
        let controller = make_controller(FakeExecutor { rows: vec![] });
        // No customer-name entity: the rule generator's simple_query template
        // has nothing to match, and rule_only never falls back to the LLM,
        // so the request fails before reaching C9.
        let request = fixture_request("");
        let (sender, _receiver) = broadcast::channel(16);
        let token = CancellationToken::new();

        let result = controller.run(request, sender, token).await;
        assert!(result.is_err());

        let stats = controller.cache.stats();
        assert_eq!(stats.entry_count, 0);
    }
}
