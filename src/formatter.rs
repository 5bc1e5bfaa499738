//! C10 — Result Formatter: tokenizes the query, highlights matches inside
//! string columns (HTML-escaping first so injected markup becomes inert),
//! and computes pagination metadata.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::{PageInfo, ResultRow};

const HIGHLIGHT_OPEN: &str = "«";
const HIGHLIGHT_CLOSE: &str = "»";

pub struct ResultFormatter;

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Tokenizes on whitespace and CJK character-class boundaries (each CJK
    /// character is its own token, since CJK text carries no word spacing).
    pub fn tokenize(&self, query: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        for ch in query.chars() {
            if ch.is_whitespace() {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            } else if is_cjk(ch) {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(ch.to_string());
            } else {
                current.push(ch);
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        tokens.retain(|t| !t.is_empty());
        tokens
    }

    pub fn highlight_rows(
        &self,
        rows: Vec<ResultRow>,
        query: &str,
        enabled: bool,
    ) -> (Vec<ResultRow>, bool) {
        if !enabled {
            return (rows, false);
        }
        let tokens = self.tokenize(query);
        if tokens.is_empty() {
            return (rows, false);
        }

        let highlighted = rows
            .into_iter()
            .map(|row| highlight_row(row, &tokens))
            .collect();
        (highlighted, true)
    }

    pub fn paginate(
        &self,
        rows: Vec<ResultRow>,
        offset: u32,
        limit: u32,
    ) -> (Vec<ResultRow>, PageInfo) {
        let total = rows.len() as u32;
        let start = (offset as usize).min(rows.len());
        let end = ((offset + limit) as usize).min(rows.len());
        let page = rows[start..end].to_vec();
        (page, PageInfo::compute(offset, limit, total))
    }
}

fn highlight_row(row: ResultRow, tokens: &[String]) -> ResultRow {
    row.into_iter()
        .map(|(column, value)| {
            let highlighted = match value {
                Value::String(s) => Value::String(highlight_string(&s, tokens)),
                other => other,
            };
            (column, highlighted)
        })
        .collect::<BTreeMap<_, _>>()
}

fn highlight_string(original: &str, tokens: &[String]) -> String {
    let escaped = html_escape(original);
    let lower = escaped.to_lowercase();
    let mut ranges: Vec<(usize, usize)> = Vec::new();

    for token in tokens {
        let token_lower = token.to_lowercase();
        if token_lower.is_empty() {
            continue;
        }
        let mut search_from = 0;
        while let Some(pos) = lower[search_from..].find(&token_lower) {
            let start = search_from + pos;
            let end = start + token_lower.len();
            ranges.push((start, end));
            search_from = end;
        }
    }

    if ranges.is_empty() {
        return escaped;
    }

    ranges.sort_unstable();
    let merged = merge_ranges(ranges);

    let mut out = String::with_capacity(escaped.len() + merged.len() * 4);
    let mut cursor = 0;
    for (start, end) in merged {
        out.push_str(&escaped[cursor..start]);
        out.push_str(HIGHLIGHT_OPEN);
        out.push_str(&escaped[start..end]);
        out.push_str(HIGHLIGHT_CLOSE);
        cursor = end;
    }
    out.push_str(&escaped[cursor..]);
    out
}

fn merge_ranges(ranges: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in ranges {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => {
                *last_end = (*last_end).max(end);
            },
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn is_cjk(ch: char) -> bool {
    matches!(ch as u32,
        0x1100..=0x11FF | 0x3040..=0x30FF | 0x3130..=0x318F |
        0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7A3 | 0xF900..=0xFAFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_cjk_character_by_character() {
        let formatter = ResultFormatter::new();
        let tokens = formatter.tokenize("customers named 홍길동");
        assert!(tokens.contains(&"홍".to_string()));
        assert!(tokens.contains(&"길".to_string()));
        assert!(tokens.contains(&"동".to_string()));
    }

    #[test]
    fn html_escapes_before_highlighting() {
        let mut row = BTreeMap::new();
        row.insert("name".to_string(), Value::String("<script>alert(1)</script>".to_string()));
        let highlighted = highlight_row(row, &["script".to_string()]);
        let value = highlighted.get("name").unwrap().as_str().unwrap();
        assert!(!value.contains("<script>"));
        assert!(value.contains("&lt;"));
        assert!(value.contains(HIGHLIGHT_OPEN));
    }

    #[test]
    fn pagination_math() {
        let formatter = ResultFormatter::new();
        let rows: Vec<ResultRow> = (0..25).map(|i| {
            let mut r = BTreeMap::new();
            r.insert("id".to_string(), Value::from(i));
            r
        }).collect();
        let (page, info) = formatter.paginate(rows, 10, 10);
        assert_eq!(page.len(), 10);
        assert_eq!(info.page, 2);
        assert_eq!(info.pages, 3);
        assert!(info.has_next);
        assert!(info.has_prev);
    }
}
