//! C6 — Strategy Scheduler: orchestrates the rule generator (C3) and the LLM
//! generator (C4, wrapped by C5) according to the request's strategy.

use tokio_util::sync::CancellationToken;

use crate::models::{Intent, SqlArtifact, SqlSource, Strategy};
use crate::retry::{run_with_retry, RetryError, RetryPolicy};
use crate::sql::{GenerationError, SqlGenerator};

#[derive(Debug, thiserror::Error)]
#[error("generation failed: {reasons:?}")]
pub struct GenerationFailed {
    pub reasons: Vec<String>,
}

pub struct StrategyScheduler<'a> {
    pub rule_generator: &'a dyn SqlGenerator,
    pub llm_generator: &'a dyn SqlGenerator,
    pub retry_policy: RetryPolicy,
}

impl<'a> StrategyScheduler<'a> {
    pub fn new(
        rule_generator: &'a dyn SqlGenerator,
        llm_generator: &'a dyn SqlGenerator,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self { rule_generator, llm_generator, retry_policy }
    }

    pub async fn schedule(
        &self,
        intent: &Intent,
        strategy: Strategy,
        deadline: tokio::time::Instant,
        cancellation: &CancellationToken,
    ) -> Result<SqlArtifact, GenerationFailed> {
        match strategy {
            Strategy::RuleOnly => self
                .rule_generator
                .generate(intent)
                .await
                .map_err(|e| GenerationFailed { reasons: vec![e.kind().to_string()] }),

            Strategy::LlmOnly => self.run_llm_with_retry(intent, deadline, cancellation).await,

            Strategy::RuleFirst => match self.rule_generator.generate(intent).await {
                Ok(artifact) if artifact.confidence >= 0.5 => Ok(artifact),
                _ => self.run_llm_with_retry(intent, deadline, cancellation).await,
            },

            Strategy::LlmFirst => {
                match self.run_llm_with_retry(intent, deadline, cancellation).await {
                    Ok(artifact) => Ok(artifact),
                    Err(_) => self
                        .rule_generator
                        .generate(intent)
                        .await
                        .map_err(|e| GenerationFailed { reasons: vec![e.kind().to_string()] }),
                }
            },

            Strategy::Hybrid => self.run_hybrid(intent, deadline, cancellation).await,
        }
    }

    async fn run_llm_with_retry(
        &self,
        intent: &Intent,
        deadline: tokio::time::Instant,
        cancellation: &CancellationToken,
    ) -> Result<SqlArtifact, GenerationFailed> {
        let result = run_with_retry(
            self.retry_policy,
            deadline,
            cancellation,
            GenerationError::is_retryable,
            || self.llm_generator.generate(intent),
        )
        .await;

        match result {
            Ok(artifact) => Ok(artifact),
            Err(RetryError::Timeout) => Err(GenerationFailed { reasons: vec!["llm_timeout".to_string()] }),
            Err(RetryError::Canceled) => Err(GenerationFailed { reasons: vec!["canceled".to_string()] }),
            Err(RetryError::Exhausted(e)) => {
                Err(GenerationFailed { reasons: vec![e.kind().to_string()] })
            },
        }
    }

    /// Runs both branches under the shared deadline and, per the resolved
    /// open question, awaits both to completion rather than cancelling the
    /// slower one once the first finishes. Ties favor the rule result.
    async fn run_hybrid(
        &self,
        intent: &Intent,
        deadline: tokio::time::Instant,
        cancellation: &CancellationToken,
    ) -> Result<SqlArtifact, GenerationFailed> {
        let rule_future = self.rule_generator.generate(intent);
        let llm_future = self.run_llm_with_retry(intent, deadline, cancellation);

        let (rule_result, llm_result) = futures::join!(rule_future, llm_future);

        match (rule_result, llm_result) {
            (Ok(rule), Ok(llm)) => {
                if llm.confidence > rule.confidence {
                    Ok(llm)
                } else {
                    Ok(rule)
                }
            },
            (Ok(rule), Err(_)) => Ok(rule),
            (Err(_), Ok(llm)) => Ok(llm),
            (Err(rule_err), Err(llm_err)) => Err(GenerationFailed {
                reasons: vec![rule_err.kind().to_string()]
                    .into_iter()
                    .chain(llm_err.reasons)
                    .collect(),
            }),
        }
    }
}

#[allow(dead_code)]
fn prefers_rule_on_tie(rule: &SqlArtifact) -> SqlSource {
    rule.source
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Intent, IntentKind};
    use async_trait::async_trait;

    struct AlwaysOk(f64, SqlSource);

    #[async_trait]
    impl SqlGenerator for AlwaysOk {
        async fn generate(&self, _intent: &Intent) -> Result<SqlArtifact, GenerationError> {
            Ok(SqlArtifact {
                sql: "SELECT 1".to_string(),
                parameters: Default::default(),
                explanation: "fixture".to_string(),
                confidence: self.0,
                source: self.1,
            })
        }
    }

    struct AlwaysFail;

    #[async_trait]
    impl SqlGenerator for AlwaysFail {
        async fn generate(&self, _intent: &Intent) -> Result<SqlArtifact, GenerationError> {
            Err(GenerationError::NoRuleMatch)
        }
    }

    #[tokio::test]
    async fn rule_only_uses_rule_generator_only() {
        let rule = AlwaysOk(0.9, SqlSource::Rule);
        let llm = AlwaysFail;
        let scheduler = StrategyScheduler::new(&rule, &llm, RetryPolicy::default());
        let intent = Intent::new(IntentKind::SimpleQuery);
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
        let token = CancellationToken::new();
        let artifact = scheduler.schedule(&intent, Strategy::RuleOnly, deadline, &token).await.unwrap();
        assert_eq!(artifact.source, SqlSource::Rule);
    }

    #[tokio::test]
    async fn hybrid_prefers_higher_confidence() {
        let rule = AlwaysOk(0.6, SqlSource::Rule);
        let llm = AlwaysOk(0.9, SqlSource::Llm);
        let scheduler = StrategyScheduler::new(&rule, &llm, RetryPolicy::default());
        let intent = Intent::new(IntentKind::SimpleQuery);
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
        let token = CancellationToken::new();
        let artifact = scheduler.schedule(&intent, Strategy::Hybrid, deadline, &token).await.unwrap();
        assert_eq!(artifact.source, SqlSource::Llm);
        assert!(artifact.confidence >= 0.6_f64.max(0.9));
    }

    #[tokio::test]
    async fn hybrid_ties_favor_rule() {
        let rule = AlwaysOk(0.7, SqlSource::Rule);
        let llm = AlwaysOk(0.7, SqlSource::Llm);
        let scheduler = StrategyScheduler::new(&rule, &llm, RetryPolicy::default());
        let intent = Intent::new(IntentKind::SimpleQuery);
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
        let token = CancellationToken::new();
        let artifact = scheduler.schedule(&intent, Strategy::Hybrid, deadline, &token).await.unwrap();
        assert_eq!(artifact.source, SqlSource::Rule);
    }

    #[tokio::test]
    async fn hybrid_both_fail_unions_reasons() {
        let rule = AlwaysFail;
        let llm = AlwaysFail;
        let scheduler = StrategyScheduler::new(&rule, &llm, RetryPolicy::default());
        let intent = Intent::new(IntentKind::SimpleQuery);
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
        let token = CancellationToken::new();
        let result = scheduler.schedule(&intent, Strategy::Hybrid, deadline, &token).await;
        assert!(result.is_err());
    }
}
