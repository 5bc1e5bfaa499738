//! SQL generation and validation: the rule-based generator (C3), the LLM
//! generator (C4), and the safety validator (C2) that sits between them and
//! the query runner.

pub mod llm_generator;
pub mod rule_generator;
pub mod validator;

pub use llm_generator::LlmSqlGenerator;
pub use rule_generator::RuleSqlGenerator;
pub use validator::SqlValidator;

use crate::models::Intent;
use async_trait::async_trait;

/// Adapter seam shared by the rule-based and LLM-based generators so the
/// scheduler (C6) can treat both uniformly and tests can substitute fakes.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate(&self, intent: &Intent) -> Result<crate::models::SqlArtifact, GenerationError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("no rule template matched")]
    NoRuleMatch,
    #[error("llm provider unavailable: {0}")]
    LlmUnavailable(String),
    #[error("llm call timed out")]
    LlmTimeout,
    #[error("llm response was malformed: {0}")]
    LlmMalformed(String),
}

impl GenerationError {
    /// Retriable per §4.5 / §7: `llm_timeout` and `llm_malformed` are
    /// consumed by the retry executor; everything else short-circuits.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerationError::LlmTimeout | GenerationError::LlmMalformed(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::NoRuleMatch => "no_rule_match",
            GenerationError::LlmUnavailable(_) => "llm_unavailable",
            GenerationError::LlmTimeout => "llm_timeout",
            GenerationError::LlmMalformed(_) => "llm_malformed",
        }
    }
}
