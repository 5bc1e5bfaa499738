//! Cache key computation — §6: `digest(normalize(query) || "\x1f" ||
//! json_canonical(sorted context) || "\x1f" || json_canonical(sorted
//! options))`, rendered as 32 lowercase hex characters.

use super::json_canonical;
use crate::models::QueryOptions;
use serde_json::Value;
use std::collections::BTreeMap;

pub fn compute_cache_key(
    normalized_query: &str,
    context: &BTreeMap<String, Value>,
    options: &QueryOptions,
) -> String {
    let context_json = Value::Object(context.clone().into_iter().collect());
    let options_json = serde_json::to_value(options).unwrap_or(Value::Null);

    let mut buf = String::with_capacity(normalized_query.len() + 64);
    buf.push_str(normalized_query);
    buf.push('\u{1f}');
    buf.push_str(&json_canonical(&context_json));
    buf.push('\u{1f}');
    buf.push_str(&json_canonical(&options_json));

    let digest = md5::compute(buf.as_bytes());
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryRequest;

    #[test]
    fn same_normalized_query_same_key() {
        let ctx = BTreeMap::new();
        let opts = QueryOptions::default();
        let k1 = compute_cache_key(&QueryRequest::normalize_query("Hello  World"), &ctx, &opts);
        let k2 = compute_cache_key(&QueryRequest::normalize_query("hello world"), &ctx, &opts);
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 32);
    }

    #[test]
    fn differing_context_differs() {
        let opts = QueryOptions::default();
        let mut ctx1 = BTreeMap::new();
        ctx1.insert("a".to_string(), Value::from(1));
        let ctx2 = BTreeMap::new();
        let k1 = compute_cache_key("q", &ctx1, &opts);
        let k2 = compute_cache_key("q", &ctx2, &opts);
        assert_ne!(k1, k2);
    }

    #[test]
    fn key_order_independent_of_map_insertion_order() {
        let opts = QueryOptions::default();
        let mut ctx1 = BTreeMap::new();
        ctx1.insert("b".to_string(), Value::from(2));
        ctx1.insert("a".to_string(), Value::from(1));
        let mut ctx2 = BTreeMap::new();
        ctx2.insert("a".to_string(), Value::from(1));
        ctx2.insert("b".to_string(), Value::from(2));
        assert_eq!(compute_cache_key("q", &ctx1, &opts), compute_cache_key("q", &ctx2, &opts));
    }
}
