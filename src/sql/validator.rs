//! C2 — SQL Validator: the only line of defence between external text and
//! the database. Rules R1–R7 are ANDed; any failure rejects, and every
//! rejection reason is a stable rule-id, never the offending SQL.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::ValidationVerdict;

const MAX_SQL_BYTES: usize = 10 * 1024;
const MAX_LIMIT: u32 = 100;

static DESTRUCTIVE_VERBS: &[&str] = &[
    "drop", "delete", "update", "insert", "truncate", "alter", "create", "grant", "revoke", "copy",
];

static SYSTEM_ACCESS: &[&str] = &[
    "pg_sleep",
    "pg_read_file",
    "lo_import",
    "lo_export",
    "current_user",
    "session_user",
    "version(",
    "information_schema",
    "pg_catalog",
];

static WORD_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap());

static TABLE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:from|join)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());

static UNION_TABLE_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bunion\b(?:\s+all)?\s+select\b.*?\bfrom\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap()
});

static LIMIT_CLAUSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\blimit\s+(\d+)\b").unwrap());

static COMMENT_FOLLOWED_BY_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)(?:--[^\n]*|/\*.*?\*/)\s*\b(select|insert|update|delete|drop|truncate|alter|create|grant|revoke|union)\b",
    )
    .unwrap()
});

pub struct SqlValidator {
    whitelist: Vec<String>,
}

impl SqlValidator {
    pub fn new(whitelist: Vec<String>) -> Self {
        Self { whitelist: whitelist.into_iter().map(|t| t.to_lowercase()).collect() }
    }

    pub fn validate(&self, sql: &str) -> ValidationVerdict {
        let mut reasons = Vec::new();

        if sql.len() > MAX_SQL_BYTES {
            reasons.push("too_long".to_string());
            return ValidationVerdict::reject(reasons, sql.to_string());
        }

        let stripped = strip_comments(sql);
        let trimmed = stripped.trim_start();
        let starts_ok = {
            let lowered = trimmed.to_lowercase();
            lowered.starts_with("select") || lowered.starts_with("with")
        };
        if !starts_ok {
            reasons.push("non_select".to_string());
        }

        if contains_destructive_verb(&stripped) {
            reasons.push("destructive".to_string());
        }

        if contains_system_access(&stripped) {
            reasons.push("system_access".to_string());
        }

        if let Some(reason) = injection_reason(sql, &stripped, &self.whitelist) {
            reasons.push(reason);
        }

        if let Some(reason) = self.unauthorized_table_reason(&stripped) {
            reasons.push(reason);
        }

        if !reasons.is_empty() {
            return ValidationVerdict::reject(reasons, sql.to_string());
        }

        match enforce_limit(sql) {
            Ok(normalized_sql) => ValidationVerdict::accept(normalized_sql),
            Err(reason) => ValidationVerdict::reject(vec![reason], sql.to_string()),
        }
    }

    fn unauthorized_table_reason(&self, stripped: &str) -> Option<String> {
        for capture in TABLE_REF.captures_iter(stripped) {
            let table = capture[1].to_lowercase();
            if !self.whitelist.contains(&table) {
                return Some("unauthorized_table".to_string());
            }
        }
        None
    }
}

/// Strips `--` line comments and `/* … */` block comments for the purpose of
/// rule checks only; the original SQL text is preserved for execution.
fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_single_quote = false;
    let mut i = 0;
    while i < sql.len() {
        let c = sql[i..].chars().next().expect("index within bounds of a char boundary");
        if in_single_quote {
            out.push(c);
            if c == '\'' {
                in_single_quote = false;
            }
            i += c.len_utf8();
            continue;
        }
        if c == '\'' {
            in_single_quote = true;
            out.push(c);
            i += c.len_utf8();
            continue;
        }
        if sql[i..].starts_with("--") {
            while i < sql.len() && sql.as_bytes()[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if sql[i..].starts_with("/*") {
            if let Some(end) = sql[i + 2..].find("*/") {
                i += 2 + end + 2;
            } else {
                i = sql.len();
            }
            continue;
        }
        out.push(c);
        i += c.len_utf8();
    }
    out
}

fn contains_destructive_verb(stripped: &str) -> bool {
    let lowered = stripped.to_lowercase();
    WORD_BOUNDARY.find_iter(&lowered).any(|m| DESTRUCTIVE_VERBS.contains(&m.as_str()))
}

fn contains_system_access(stripped: &str) -> bool {
    let lowered = stripped.to_lowercase();
    SYSTEM_ACCESS.iter().any(|needle| lowered.contains(needle))
}

fn injection_reason(original: &str, stripped: &str, whitelist: &[String]) -> Option<String> {
    let quote_count = stripped.matches('\'').count();
    if quote_count % 2 != 0 {
        return Some("injection".to_string());
    }

    if has_stacked_statement(stripped) {
        return Some("injection".to_string());
    }

    for capture in UNION_TABLE_REF.captures_iter(stripped) {
        let table = capture[1].to_lowercase();
        if !whitelist.contains(&table) {
            return Some("injection".to_string());
        }
    }

    // Checked against `original`, not `stripped`: `strip_comments` deletes a
    // `--`-commented tail outright, which would erase the very verb this
    // rule looks for before it ever reached this point.
    if has_comment_followed_by_verb(original) {
        return Some("injection".to_string());
    }

    None
}

/// A `;` followed by anything other than whitespace or a comment indicates a
/// stacked statement (ignoring a single trailing terminator).
fn has_stacked_statement(stripped: &str) -> bool {
    let trimmed = stripped.trim_end();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed);
    let mut rest = trimmed;
    while let Some(pos) = rest.find(';') {
        let after = rest[pos + 1..].trim_start();
        if !after.is_empty() {
            return true;
        }
        rest = &rest[pos + 1..];
    }
    false
}

/// R5's fourth sub-pattern: a comment token followed by another statement
/// verb, the classic `-- ' OR 1=1; SELECT ...` obfuscation shape.
fn has_comment_followed_by_verb(original: &str) -> bool {
    COMMENT_FOLLOWED_BY_VERB.is_match(original)
}

/// R7: append `LIMIT 100` if absent; reject if a literal LIMIT exceeds 100.
fn enforce_limit(sql: &str) -> Result<String, String> {
    if let Some(capture) = LIMIT_CLAUSE.captures(sql) {
        let value: u32 = capture[1].parse().unwrap_or(u32::MAX);
        if value > MAX_LIMIT {
            return Err("limit_exceeded".to_string());
        }
        Ok(sql.to_string())
    } else {
        let trimmed = sql.trim_end();
        let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed);
        Ok(format!("{} LIMIT {}", trimmed, MAX_LIMIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whitelist() -> Vec<String> {
        vec!["customers".to_string(), "customer_memos".to_string()]
    }

    #[test]
    fn accepts_plain_select_and_appends_limit() {
        let v = SqlValidator::new(whitelist());
        let verdict = v.validate("SELECT * FROM customers WHERE name = %(n)s");
        assert!(verdict.accepted);
        assert!(verdict.normalized_sql.contains("LIMIT 100"));
    }

    #[test]
    fn rejects_non_select() {
        let v = SqlValidator::new(whitelist());
        let verdict = v.validate("UPDATE customers SET name = 'x'");
        assert!(!verdict.accepted);
        assert!(verdict.reasons.contains(&"non_select".to_string()));
        assert!(verdict.reasons.contains(&"destructive".to_string()));
    }

    #[test]
    fn rejects_stacked_statement_injection() {
        let v = SqlValidator::new(whitelist());
        let verdict = v.validate("SELECT * FROM customers; DROP TABLE customers; --");
        assert!(!verdict.accepted);
        assert!(verdict.reasons.contains(&"destructive".to_string()));
        assert!(verdict.reasons.contains(&"injection".to_string()));
    }

    #[test]
    fn rejects_unauthorized_table() {
        let v = SqlValidator::new(whitelist());
        let verdict = v.validate("SELECT * FROM secret_table");
        assert!(!verdict.accepted);
        assert!(verdict.reasons.contains(&"unauthorized_table".to_string()));
    }

    #[test]
    fn rejects_system_access_functions() {
        let v = SqlValidator::new(whitelist());
        let verdict = v.validate("SELECT pg_sleep(5) FROM customers");
        assert!(!verdict.accepted);
        assert!(verdict.reasons.contains(&"system_access".to_string()));
    }

    #[test]
    fn limit_boundary_100_accepted_101_rejected() {
        let v = SqlValidator::new(whitelist());
        let ok = v.validate("SELECT * FROM customers LIMIT 100");
        assert!(ok.accepted);
        let rejected = v.validate("SELECT * FROM customers LIMIT 101");
        assert!(!rejected.accepted);
        assert!(rejected.reasons.contains(&"limit_exceeded".to_string()));
    }

    #[test]
    fn rejects_comment_followed_by_verb() {
        let v = SqlValidator::new(whitelist());
        let verdict =
            v.validate("SELECT * FROM customers -- ignore below\nSELECT password FROM customers");
        assert!(!verdict.accepted);
        assert!(verdict.reasons.contains(&"injection".to_string()));
    }

    #[test]
    fn length_cap_boundary() {
        let v = SqlValidator::new(whitelist());
        let base = "SELECT * FROM customers WHERE name = '";
        let pad_ok = "a".repeat(10 * 1024 - base.len() - 2);
        let sql_ok = format!("{}{}'", base, pad_ok);
        assert_eq!(sql_ok.len(), 10 * 1024 - 1);
        assert!(v.validate(&sql_ok).accepted);

        let pad_long = "a".repeat(10 * 1024 + 5);
        let sql_long = format!("{}{}'", base, pad_long);
        let verdict = v.validate(&sql_long);
        assert!(!verdict.accepted);
        assert!(verdict.reasons.contains(&"too_long".to_string()));
    }
}
