//! C9 — Read-Only Query Runner: executes validated SQL against the
//! read-only pool, enforcing a statement timeout and a row-count cap as a
//! second line of defence behind the validator's `LIMIT` enforcement.
//!
//! Row mapping follows the column/row extraction shape of `mysql_client.rs`'s
//! `process_query_result`, adapted to `sqlx::postgres::PgRow`.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgRow, PgTypeInfo};
use sqlx::{Column, PgPool, Row, TypeInfo};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::models::SqlArtifact;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("statement timed out")]
    Timeout,
}

/// Adapter seam so the pipeline controller can be tested with a fake runner.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        artifact: &SqlArtifact,
        row_cap: u32,
    ) -> Result<(Vec<BTreeMap<String, Value>>, Duration), RunnerError>;
}

pub struct PgQueryRunner {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgQueryRunner {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self { pool, statement_timeout }
    }

    fn bind_query<'q>(
        &self,
        artifact: &'q SqlArtifact,
    ) -> Result<(String, Vec<&'q Value>), RunnerError> {
        // Rewrite `%(name)s` placeholders into positional `$n` binds, in
        // first-occurrence order, so values are never string-interpolated.
        let mut rewritten = String::with_capacity(artifact.sql.len());
        let mut binds = Vec::new();
        let mut order: Vec<&str> = Vec::new();
        let sql = artifact.sql.as_str();
        let mut i = 0;
        while i < sql.len() {
            if sql[i..].starts_with("%(") {
                if let Some(close) = sql[i + 2..].find(")s") {
                    let name = &sql[i + 2..i + 2 + close];
                    let position = match order.iter().position(|n| *n == name) {
                        Some(pos) => pos,
                        None => {
                            order.push(name);
                            order.len() - 1
                        },
                    };
                    rewritten.push_str(&format!("${}", position + 1));
                    i += 2 + close + 2;
                    continue;
                }
            }
            let ch = sql[i..].chars().next().expect("index within bounds of a char boundary");
            rewritten.push(ch);
            i += ch.len_utf8();
        }

        for name in &order {
            let value = artifact
                .parameters
                .get(*name)
                .ok_or_else(|| RunnerError::Database(sqlx::Error::ColumnNotFound(name.to_string())))?;
            binds.push(value);
        }

        Ok((rewritten, binds))
    }
}

#[async_trait]
impl QueryExecutor for PgQueryRunner {
    async fn execute(
        &self,
        artifact: &SqlArtifact,
        row_cap: u32,
    ) -> Result<(Vec<BTreeMap<String, Value>>, Duration), RunnerError> {
        let (rewritten_sql, binds) = self.bind_query(artifact)?;

        let mut query = sqlx::query(&rewritten_sql);
        for value in &binds {
            query = bind_json_value(query, value);
        }

        let start = std::time::Instant::now();
        let fut = query.fetch_all(&self.pool);
        let rows = tokio::time::timeout(self.statement_timeout, fut)
            .await
            .map_err(|_| RunnerError::Timeout)??;
        let elapsed = start.elapsed();

        let mut mapped: Vec<BTreeMap<String, Value>> =
            rows.iter().map(row_to_map).collect();
        if mapped.len() as u32 > row_cap {
            mapped.truncate(row_cap as usize);
        }

        Ok((mapped, elapsed))
    }
}

fn bind_json_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        Value::String(s) => query.bind(s.as_str()),
        Value::Number(n) if n.is_i64() => query.bind(n.as_i64().unwrap()),
        Value::Number(n) => query.bind(n.as_f64().unwrap_or(0.0)),
        Value::Bool(b) => query.bind(*b),
        Value::Null => query.bind(Option::<String>::None),
        other => query.bind(other.to_string()),
    }
}

/// Converts one result row into a column→JSON-value mapping, matching the
/// column order of the result set.
fn row_to_map(row: &PgRow) -> BTreeMap<String, Value> {
    let mut map = BTreeMap::new();
    for column in row.columns() {
        let name = column.name().to_string();
        let value = value_to_json(row, column.ordinal(), column.type_info());
        map.insert(name, value);
    }
    map
}

fn value_to_json(row: &PgRow, ordinal: usize, type_info: &PgTypeInfo) -> Value {
    let type_name = type_info.name();
    match type_name {
        "INT2" | "INT4" => row
            .try_get::<i32, _>(ordinal)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "INT8" => row.try_get::<i64, _>(ordinal).map(Value::from).unwrap_or(Value::Null),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => {
            row.try_get::<f64, _>(ordinal).map(Value::from).unwrap_or(Value::Null)
        },
        "BOOL" => row.try_get::<bool, _>(ordinal).map(Value::from).unwrap_or(Value::Null),
        "JSON" | "JSONB" => row.try_get::<Value, _>(ordinal).unwrap_or(Value::Null),
        "TIMESTAMPTZ" | "TIMESTAMP" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(ordinal)
            .map(|ts| Value::String(ts.to_rfc3339()))
            .unwrap_or(Value::Null),
        _ => row.try_get::<String, _>(ordinal).map(Value::String).unwrap_or(Value::Null),
    }
}
