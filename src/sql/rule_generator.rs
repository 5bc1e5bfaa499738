//! C3 — Rule-based SQL Generator: deterministic template→SQL translation
//! keyed on intent kind and the entity kinds present. Values are always
//! bound as parameters, never inlined.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;

use super::{GenerationError, SqlGenerator};
use crate::models::{EntityKind, Intent, IntentKind, SqlArtifact, SqlSource};

pub struct RuleSqlGenerator;

impl Default for RuleSqlGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleSqlGenerator {
    pub fn new() -> Self {
        Self
    }

    fn try_generate(&self, intent: &Intent) -> Option<SqlArtifact> {
        match intent.kind {
            IntentKind::SimpleQuery => self.simple_query_template(intent),
            IntentKind::Filtering => self.filtering_template(intent),
            IntentKind::Aggregation => self.aggregation_template(intent),
            IntentKind::Join => self.join_template(intent),
        }
    }

    fn simple_query_template(&self, intent: &Intent) -> Option<SqlArtifact> {
        let names = intent.entity(EntityKind::CustomerName);
        if names.is_empty() {
            return None;
        }
        let mut parameters = BTreeMap::new();
        parameters.insert("n".to_string(), json!(names[0]));
        Some(SqlArtifact {
            sql: "SELECT * FROM customers WHERE name = %(n)s".to_string(),
            parameters,
            explanation: "lookup customers by exact name match".to_string(),
            confidence: 0.8,
            source: SqlSource::Rule,
        })
    }

    fn filtering_template(&self, intent: &Intent) -> Option<SqlArtifact> {
        let dates = intent.entity(EntityKind::Date);
        let locations = intent.entity(EntityKind::Location);
        let mut parameters = BTreeMap::new();
        let mut clauses = Vec::new();

        if let Some(date) = dates.first() {
            parameters.insert("since".to_string(), json!(date));
            clauses.push("created_at >= %(since)s".to_string());
        }
        if let Some(location) = locations.first() {
            parameters.insert("region".to_string(), json!(location));
            clauses.push("region = %(region)s".to_string());
        }
        if clauses.is_empty() {
            return None;
        }

        Some(SqlArtifact {
            sql: format!("SELECT * FROM customers WHERE {}", clauses.join(" AND ")),
            parameters,
            explanation: "filter customers by the detected predicates".to_string(),
            confidence: 0.7,
            source: SqlSource::Rule,
        })
    }

    fn aggregation_template(&self, intent: &Intent) -> Option<SqlArtifact> {
        let locations = intent.entity(EntityKind::Location);
        let mut parameters = BTreeMap::new();
        let (sql, explanation) = if let Some(region) = locations.first() {
            parameters.insert("region".to_string(), json!(region));
            (
                "SELECT region, AVG(amount) AS avg_amount, COUNT(*) AS n FROM customer_products \
                 WHERE region = %(region)s GROUP BY region"
                    .to_string(),
                "average amount grouped by the detected region".to_string(),
            )
        } else {
            (
                "SELECT COUNT(*) AS n, AVG(amount) AS avg_amount FROM customer_products"
                    .to_string(),
                "overall aggregate over customer products".to_string(),
            )
        };

        Some(SqlArtifact { sql, parameters, explanation, confidence: 0.65, source: SqlSource::Rule })
    }

    fn join_template(&self, intent: &Intent) -> Option<SqlArtifact> {
        let names = intent.entity(EntityKind::CustomerName);
        let mut parameters = BTreeMap::new();
        let sql = if let Some(name) = names.first() {
            parameters.insert("n".to_string(), json!(name));
            "SELECT c.*, p.* FROM customers c JOIN customer_products p ON p.customer_id = c.id \
             WHERE c.name = %(n)s"
                .to_string()
        } else {
            "SELECT c.*, p.* FROM customers c JOIN customer_products p ON p.customer_id = c.id"
                .to_string()
        };

        Some(SqlArtifact {
            sql,
            parameters,
            explanation: "join customers with their related products".to_string(),
            confidence: 0.6,
            source: SqlSource::Rule,
        })
    }
}

#[async_trait]
impl SqlGenerator for RuleSqlGenerator {
    async fn generate(&self, intent: &Intent) -> Result<SqlArtifact, GenerationError> {
        self.try_generate(intent).ok_or(GenerationError::NoRuleMatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Intent;

    #[tokio::test]
    async fn simple_query_produces_parameterized_sql() {
        let generator = RuleSqlGenerator::new();
        let mut intent = Intent::new(IntentKind::SimpleQuery);
        intent.insert_entity(EntityKind::CustomerName, vec!["홍길동".to_string()]);
        let artifact = generator.generate(&intent).await.unwrap();
        assert!(artifact.sql.contains("%(n)s"));
        assert!(artifact.placeholders_match_parameters());
    }

    #[tokio::test]
    async fn no_match_returns_no_rule_match() {
        let generator = RuleSqlGenerator::new();
        let intent = Intent::new(IntentKind::SimpleQuery);
        let result = generator.generate(&intent).await;
        assert!(matches!(result, Err(GenerationError::NoRuleMatch)));
    }
}
