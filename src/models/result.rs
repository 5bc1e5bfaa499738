//! The final, formatted result of a pipeline run (C10's output).

use super::{Intent, SqlArtifact};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ResultRow = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInfo {
    pub offset: u32,
    pub limit: u32,
    pub total: u32,
    pub page: u32,
    pub pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageInfo {
    pub fn compute(offset: u32, limit: u32, total: u32) -> Self {
        let limit = limit.max(1);
        let page = offset / limit + 1;
        let pages = total.div_ceil(limit).max(1);
        Self {
            offset,
            limit,
            total,
            page,
            pages,
            has_next: offset + limit < total,
            has_prev: offset > 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub sql_query: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub execution_time_ms: u64,
    pub rows_affected: u32,
    pub strategy_used: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<ResultRow>,
    pub row_count: u32,
    pub execution_time_ms: u64,
    pub strategy_used: String,
    pub sql_artifact: SqlArtifact,
    pub intent: Intent,
    pub highlighted: bool,
    pub page_info: PageInfo,
}
