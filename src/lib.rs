//! Natural-language to SQL query pipeline core.

pub mod analytics;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod formatter;
pub mod handlers;
pub mod intent;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod sql;
pub mod stream;
pub mod utils;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::analytics::AnalyticsRecorder;
use crate::cache::ResultCache;
use crate::config::Config;
use crate::formatter::ResultFormatter;
use crate::intent::IntentClassifier;
use crate::pipeline::PipelineController;
use crate::runner::{PgQueryRunner, QueryExecutor};
use crate::sql::{LlmSqlGenerator, RuleSqlGenerator, SqlGenerator, SqlValidator};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<PipelineController>,
}

impl AppState {
    pub fn new(config: Config, pool: sqlx::PgPool) -> Self {
        let config = Arc::new(config);

        let rule_generator: Arc<dyn SqlGenerator> = Arc::new(RuleSqlGenerator::new());
        let llm_generator: Arc<dyn SqlGenerator> = Arc::new(LlmSqlGenerator::new(config.llm.clone()));
        let validator = SqlValidator::new(config.pipeline.whitelist.clone());
        let runner: Arc<dyn QueryExecutor> = Arc::new(PgQueryRunner::new(
            pool.clone(),
            std::time::Duration::from_secs(config.database.statement_timeout_secs),
        ));
        let cache = Arc::new(ResultCache::new(
            std::time::Duration::from_secs(config.cache.ttl_secs),
            config.cache.max_entries,
        ));
        let analytics = Arc::new(AnalyticsRecorder::spawn(config.analytics.queue_size, Some(pool)));

        let pipeline = Arc::new(PipelineController {
            config: config.clone(),
            intent_classifier: IntentClassifier::new(),
            rule_generator,
            llm_generator,
            validator,
            runner,
            formatter: ResultFormatter::new(),
            cache,
            analytics,
        });

        Self { config, pipeline }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/search/natural-language", post(handlers::search::natural_language_search))
        .route("/search/stream", get(handlers::stream::stream_search))
        .with_state(state)
}
