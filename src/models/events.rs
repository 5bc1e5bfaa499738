//! Pipeline Event — the tagged union forwarded to C12's stream dispatcher.

use super::QueryResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intent,
    SqlGen,
    Validate,
    Execute,
    Format,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Intent => "intent",
            Stage::SqlGen => "sql_gen",
            Stage::Validate => "validate",
            Stage::Execute => "execute",
            Stage::Format => "format",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum PipelineEvent {
    ConnectionEstablished,
    SearchStarted,
    Start,
    StageStart { stage: Stage },
    StageEnd { stage: Stage, duration_ms: u64 },
    Token { content: String, stage: Stage },
    PipelineComplete { result: Box<QueryResult> },
    Error { kind: String, message: String },
    CacheHit,
}

impl PipelineEvent {
    /// Events that terminate the stream for a request: at most one of these
    /// may be emitted per request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::PipelineComplete { .. } | PipelineEvent::Error { .. })
    }
}

/// Wire envelope: every event carries `request_id` and a monotonically
/// increasing `seq`, per the streaming interface contract.
#[derive(Debug, Clone, Serialize)]
pub struct WireEvent {
    pub request_id: String,
    pub seq: u64,
    #[serde(flatten)]
    pub event: PipelineEvent,
}
