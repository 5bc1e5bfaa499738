//! Regex tables driving entity extraction and kind classification.

use once_cell::sync::Lazy;
use regex::Regex;

pub static CUSTOMER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:named|called|customer)\s+([\p{L}][\p{L}\s]{0,30}?)(?:[,.!?]|\s+(?:who|that|and)\b|$)").unwrap());

pub static KOREAN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[가-힣]{2,4}(?=\s|$|[,.!?])").unwrap());

pub static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{2,4}|last\s+\w+|this\s+\w+|\d+\s*(?:days?|weeks?|months?|years?)\s+ago)\b").unwrap()
});

pub static AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$?\b\d+(?:,\d{3})*(?:\.\d+)?\s*(?:dollars?|원|won)?\b").unwrap());

pub static PRODUCT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:product|plan|policy)\s+([\p{L}][\p{L}\d\s]{0,30}?)(?:[,.!?]|\s+(?:for|with)\b|$)").unwrap()
});

pub static LOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:in|at|from|region)\s+([\p{L}][\p{L}\s]{0,20}?)(?:[,.!?]|$)").unwrap()
});

pub static AGGREGATION_SIGNAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(average|avg|sum|total|count|max|min|group\s+by|per\s+\w+)\b").unwrap()
});

pub static JOIN_SIGNAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(with their|along with|together with|and their|combined with|related\s+\w+)\b").unwrap()
});

pub static FILTERING_SIGNAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(where|named|called|from|since|after|before|greater than|less than|over|under)\b").unwrap()
});

pub static STOPWORDS: Lazy<std::collections::HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "is", "are", "was", "were", "of", "to", "for", "and", "or", "in", "on",
        "at", "by", "with", "that", "who", "which",
    ]
    .into_iter()
    .collect()
});
