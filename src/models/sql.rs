//! SQL Artifact and Validation Verdict — C3/C4's output and C2's verdict.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlSource {
    Rule,
    Llm,
    Hybrid,
}

impl SqlSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlSource::Rule => "rule",
            SqlSource::Llm => "llm",
            SqlSource::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlArtifact {
    pub sql: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub explanation: String,
    pub confidence: f64,
    pub source: SqlSource,
}

impl SqlArtifact {
    /// Every `%(name)s` placeholder in `sql` is a key of `parameters` and
    /// vice versa — the invariant from the data model section.
    pub fn placeholders_match_parameters(&self) -> bool {
        let placeholders = extract_placeholders(&self.sql);
        let param_keys: std::collections::BTreeSet<&str> =
            self.parameters.keys().map(String::as_str).collect();
        let placeholder_set: std::collections::BTreeSet<&str> =
            placeholders.iter().map(String::as_str).collect();
        placeholder_set == param_keys
    }

    pub fn confidence_clamped(&self) -> f64 {
        self.confidence.clamp(0.0, 1.0)
    }
}

/// Extracts every `%(name)s` style placeholder name from a SQL string.
pub fn extract_placeholders(sql: &str) -> Vec<String> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'%' && bytes[i + 1] == b'(' {
            if let Some(close) = sql[i + 2..].find(")s") {
                let name = &sql[i + 2..i + 2 + close];
                out.push(name.to_string());
                i += 2 + close + 2;
                continue;
            }
        }
        i += 1;
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub accepted: bool,
    pub reasons: Vec<String>,
    pub normalized_sql: String,
}

impl ValidationVerdict {
    pub fn accept(normalized_sql: String) -> Self {
        Self { accepted: true, reasons: Vec::new(), normalized_sql }
    }

    pub fn reject(reasons: Vec<String>, normalized_sql: String) -> Self {
        debug_assert!(!reasons.is_empty());
        Self { accepted: false, reasons, normalized_sql }
    }
}
