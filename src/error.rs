//! Error taxonomy for the query pipeline.
//!
//! Mirrors the shape of `services/llm/models.rs::LLMError` in spirit: one
//! `thiserror` enum, an `is_retryable` predicate consumed by the retry
//! executor, and an `IntoResponse` impl so handlers can just bubble `?`.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;

/// Taxonomy of terminal pipeline failures (spec §7).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("sql rejected: {0:?}")]
    Security(Vec<String>),

    #[error("sql generation failed: {0:?}")]
    GenerationFailed(Vec<String>),

    #[error("database error: {0}")]
    Runtime(String),

    #[error("deadline exceeded")]
    Timeout,

    #[error("streaming client too slow")]
    Backpressure,

    #[error("client disconnected")]
    Canceled,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Security(_) => "security",
            Self::GenerationFailed(_) => "generation_failed",
            Self::Runtime(_) | Self::Database(_) | Self::Serialization(_) => "runtime",
            Self::Timeout => "timeout",
            Self::Backpressure => "backpressure",
            Self::Canceled => "canceled",
        }
    }

    /// Whether this error should never be echoed with its underlying detail
    /// (security rejections must only surface rule-ids, never the SQL).
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security(_))
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Security(_) => StatusCode::BAD_REQUEST,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::GenerationFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Backpressure => StatusCode::SERVICE_UNAVAILABLE,
            Self::Canceled => StatusCode::BAD_REQUEST,
            Self::Runtime(_) | Self::Database(_) | Self::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        };

        let message = if self.is_security() {
            match &self {
                Self::Security(reasons) => reasons.join(", "),
                _ => unreachable!(),
            }
        } else {
            self.to_string()
        };

        let body = json!({
            "success": false,
            "error": {
                "kind": self.kind(),
                "message": message,
                "request_id": uuid::Uuid::new_v4().to_string(),
            }
        });

        (status, Json(body)).into_response()
    }
}
