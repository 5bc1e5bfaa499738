//! The structured classification produced by the intent classifier (C1).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    SimpleQuery,
    Filtering,
    Aggregation,
    Join,
}

impl IntentKind {
    /// Precedence used when more than one kind's patterns match: aggregation
    /// beats join beats filtering beats simple_query.
    pub fn precedence(self) -> u8 {
        match self {
            IntentKind::Aggregation => 3,
            IntentKind::Join => 2,
            IntentKind::Filtering => 1,
            IntentKind::SimpleQuery => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    CustomerName,
    Date,
    ProductName,
    Amount,
    Location,
    Keyword,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    /// Entity kinds with an empty list are omitted entirely, per the data
    /// model invariant, rather than serialized as an empty array.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub entities: BTreeMap<EntityKind, Vec<String>>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub complexity: f64,
    pub confidence: f64,
    pub reasoning: String,
}

impl Intent {
    pub fn new(kind: IntentKind) -> Self {
        Self {
            kind,
            entities: BTreeMap::new(),
            keywords: Vec::new(),
            complexity: 0.0,
            confidence: 0.0,
            reasoning: String::new(),
        }
    }

    pub fn insert_entity(&mut self, kind: EntityKind, values: Vec<String>) {
        if !values.is_empty() {
            self.entities.entry(kind).or_default().extend(values);
        }
    }

    pub fn entity(&self, kind: EntityKind) -> &[String] {
        self.entities.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Clamps `complexity`/`confidence` into `[0,1]`, per the data model
    /// invariant — call once classification has assigned raw scores.
    pub fn clamp_scores(&mut self) {
        self.complexity = self.complexity.clamp(0.0, 1.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);
    }
}
