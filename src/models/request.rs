//! The inbound query request and its options, as received over HTTP/WS.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    LlmFirst,
    RuleFirst,
    Hybrid,
    LlmOnly,
    RuleOnly,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::RuleFirst
    }
}

impl Strategy {
    /// The spec's snake_case token for this strategy (`rule_first`,
    /// `llm_only`, ...) — the same spelling `#[serde(rename_all =
    /// "snake_case")]` produces, exposed directly so non-serde call sites
    /// (analytics, `strategy_used`) don't have to go through JSON to get it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::LlmFirst => "llm_first",
            Strategy::RuleFirst => "rule_first",
            Strategy::Hybrid => "hybrid",
            Strategy::LlmOnly => "llm_only",
            Strategy::RuleOnly => "rule_only",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub strategy: Option<Strategy>,
    pub timeout_seconds: Option<u64>,
    pub use_cache: Option<bool>,
    pub enable_highlighting: Option<bool>,
    pub limit: Option<u32>,
}

impl QueryOptions {
    pub fn strategy_or_default(&self, default: Strategy) -> Strategy {
        self.strategy.unwrap_or(default)
    }

    pub fn use_cache_or_default(&self) -> bool {
        self.use_cache.unwrap_or(true)
    }

    pub fn enable_highlighting_or_default(&self) -> bool {
        self.enable_highlighting.unwrap_or(true)
    }

    pub fn limit_or_default(&self, default: u32) -> u32 {
        self.limit.unwrap_or(default).min(100)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub options: QueryOptions,
    pub user_id: Option<i64>,
}

impl QueryRequest {
    /// Lowercases and collapses internal whitespace runs to a single space,
    /// trims the ends. Deterministic and idempotent: `normalize(normalize(q))
    /// == normalize(q)`.
    pub fn normalize_query(raw: &str) -> String {
        let lowered = raw.to_lowercase();
        let mut out = String::with_capacity(lowered.len());
        let mut last_was_space = false;
        for ch in lowered.trim().chars() {
            if ch.is_whitespace() {
                if !last_was_space {
                    out.push(' ');
                    last_was_space = true;
                }
            } else {
                out.push(ch);
                last_was_space = false;
            }
        }
        out
    }

    pub fn normalized(&self) -> String {
        Self::normalize_query(&self.query)
    }
}
