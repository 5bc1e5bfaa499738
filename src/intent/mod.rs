//! C1 — Intent Classifier: regex-based entity extraction and kind
//! classification. Never fails; low-signal input just yields low confidence.

mod patterns;

use crate::models::{EntityKind, Intent, IntentKind};

/// Classifies a normalized query string into a structured [`Intent`].
///
/// Morphological analysis (e.g. a Korean tokenizer) is an optional hook this
/// crate does not wire up; pattern matching is the sole source of signal,
/// which the data model explicitly allows for.
pub struct IntentClassifier;

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, normalized_query: &str) -> Intent {
        let mut intent = Intent::new(IntentKind::SimpleQuery);

        self.extract_entities(normalized_query, &mut intent);
        intent.keywords = extract_keywords(normalized_query);

        let aggregation_signals = patterns::AGGREGATION_SIGNAL.find_iter(normalized_query).count();
        let join_signals = patterns::JOIN_SIGNAL.find_iter(normalized_query).count();
        let filtering_signals = patterns::FILTERING_SIGNAL.find_iter(normalized_query).count();

        let mut candidates = vec![(IntentKind::SimpleQuery, true)];
        if aggregation_signals > 0 {
            candidates.push((IntentKind::Aggregation, true));
        }
        if join_signals > 0 {
            candidates.push((IntentKind::Join, true));
        }
        if filtering_signals > 0 {
            candidates.push((IntentKind::Filtering, true));
        }

        intent.kind = candidates
            .into_iter()
            .filter(|(_, matched)| *matched)
            .max_by_key(|(kind, _)| kind.precedence())
            .map(|(kind, _)| kind)
            .unwrap_or(IntentKind::SimpleQuery);

        let entity_count = intent.entities.values().map(Vec::len).sum::<usize>() as f64;
        intent.complexity = (0.1 * entity_count
            + 0.2 * join_signals as f64
            + 0.15 * aggregation_signals as f64
            + 0.05 * normalized_query.len() as f64 / 100.0)
            .min(1.0);

        intent.confidence = classification_confidence(&intent, normalized_query);
        intent.reasoning = format!(
            "matched {} aggregation signal(s), {} join signal(s), {} filtering signal(s), {} entity group(s)",
            aggregation_signals,
            join_signals,
            filtering_signals,
            intent.entities.len()
        );

        intent.clamp_scores();
        intent
    }

    fn extract_entities(&self, query: &str, intent: &mut Intent) {
        let mut customer_names: Vec<String> =
            patterns::CUSTOMER_NAME.captures_iter(query).map(|c| c[1].trim().to_string()).collect();
        customer_names
            .extend(patterns::KOREAN_NAME.find_iter(query).map(|m| m.as_str().to_string()));
        intent.insert_entity(EntityKind::CustomerName, dedup(customer_names));

        let dates: Vec<String> =
            patterns::DATE.find_iter(query).map(|m| m.as_str().to_string()).collect();
        intent.insert_entity(EntityKind::Date, dedup(dates));

        let products: Vec<String> =
            patterns::PRODUCT_NAME.captures_iter(query).map(|c| c[1].trim().to_string()).collect();
        intent.insert_entity(EntityKind::ProductName, dedup(products));

        let amounts: Vec<String> =
            patterns::AMOUNT.find_iter(query).map(|m| m.as_str().trim().to_string()).collect();
        intent.insert_entity(EntityKind::Amount, dedup(amounts));

        let locations: Vec<String> =
            patterns::LOCATION.captures_iter(query).map(|c| c[1].trim().to_string()).collect();
        intent.insert_entity(EntityKind::Location, dedup(locations));
    }
}

fn dedup(mut values: Vec<String>) -> Vec<String> {
    values.retain(|v| !v.is_empty());
    let mut seen = std::collections::HashSet::new();
    values.retain(|v| seen.insert(v.clone()));
    values
}

fn extract_keywords(query: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    query
        .split(|c: char| c.is_whitespace() || ",.!?;:\"'".contains(c))
        .filter(|w| w.len() > 2)
        .filter(|w| !patterns::STOPWORDS.contains(w))
        .filter(|w| seen.insert(w.to_string()))
        .map(str::to_string)
        .collect()
}

fn classification_confidence(intent: &Intent, query: &str) -> f64 {
    if query.trim().is_empty() {
        return 0.1;
    }
    let has_entities = !intent.entities.is_empty();
    let has_signal = intent.kind != IntentKind::SimpleQuery;
    match (has_entities, has_signal) {
        (true, true) => 0.9,
        (true, false) => 0.7,
        (false, true) => 0.55,
        (false, false) => 0.2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryRequest;

    #[test]
    fn simple_query_with_korean_customer_name() {
        let classifier = IntentClassifier::new();
        let normalized = QueryRequest::normalize_query("customers named 홍길동");
        let intent = classifier.classify(&normalized);
        assert_eq!(intent.kind, IntentKind::SimpleQuery);
        assert!(intent.entity(EntityKind::CustomerName).contains(&"홍길동".to_string()));
    }

    #[test]
    fn aggregation_beats_filtering() {
        let classifier = IntentClassifier::new();
        let intent = classifier.classify("average premium by region where age over 30");
        assert_eq!(intent.kind, IntentKind::Aggregation);
    }

    #[test]
    fn confidence_and_complexity_stay_in_bounds() {
        let classifier = IntentClassifier::new();
        let intent = classifier.classify("");
        assert!(intent.confidence >= 0.0 && intent.confidence <= 1.0);
        assert!(intent.complexity >= 0.0 && intent.complexity <= 1.0);
    }

    #[test]
    fn empty_query_never_fails_just_low_confidence() {
        let classifier = IntentClassifier::new();
        let intent = classifier.classify("   ");
        assert!(intent.confidence <= 0.2);
    }
}
