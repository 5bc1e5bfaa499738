//! `POST /search/natural-language` — the one-shot HTTP entrypoint.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::error::PipelineResult;
use crate::models::QueryRequest;
use crate::pipeline::events::EventBus;
use crate::AppState;

pub async fn natural_language_search(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> PipelineResult<impl IntoResponse> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let bus = EventBus::new(request_id.clone());
    let cancellation = tokio_util::sync::CancellationToken::new();

    let result = state.pipeline.run(request, bus.sender(), cancellation).await?;

    Ok(Json(json!({
        "request_id": request_id,
        "intent": result.intent,
        "execution": {
            "sql_query": result.sql_artifact.sql,
            "parameters": result.sql_artifact.parameters,
            "execution_time_ms": result.execution_time_ms,
            "rows_affected": result.row_count,
            "strategy_used": result.strategy_used,
        },
        "data": result.rows,
        "total_rows": result.page_info.total,
        "success": true,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}
