//! Extracted intent types

use serde::{Deserialize, Serialize};

/// How many items a task touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Single,
    Bulk,
    Query,
}

impl Scope {
    /// Lenient parse of a model-produced scope; unknown values are `Single`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "bulk" | "batch" | "multiple" => Scope::Bulk,
            "query" | "read" | "search" | "lookup" => Scope::Query,
            _ => Scope::Single,
        }
    }
}

/// An entity mentioned in the task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Kind of entity, e.g. `product`, `collection`, `vendor`
    pub entity_type: String,
    /// SKU, handle or name when the task gives one
    pub identifier: Option<String>,
}

/// Boolean metadata about the task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentFlags {
    pub has_pricing: bool,
    pub has_inventory: bool,
    pub has_timeframe: bool,
    pub urgent: bool,
}

/// Structured projection of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedIntent {
    pub entities: Vec<EntityRef>,
    pub action: String,
    pub scope: Scope,
    pub flags: IntentFlags,
    pub raw_task: String,
}

impl ExtractedIntent {
    /// Identifiers of every entity that has one
    pub fn identifiers(&self) -> Vec<String> {
        self.entities
            .iter()
            .filter_map(|e| e.identifier.clone())
            .collect()
    }

    pub fn is_bulk(&self) -> bool {
        self.scope == Scope::Bulk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parse() {
        assert_eq!(Scope::parse("bulk"), Scope::Bulk);
        assert_eq!(Scope::parse(" Query "), Scope::Query);
        assert_eq!(Scope::parse("single"), Scope::Single);
        assert_eq!(Scope::parse("something-else"), Scope::Single);
    }

    #[test]
    fn test_identifiers() {
        let intent = ExtractedIntent {
            entities: vec![
                EntityRef { entity_type: "product".into(), identifier: Some("ABC-123".into()) },
                EntityRef { entity_type: "collection".into(), identifier: None },
            ],
            action: "update_price".into(),
            scope: Scope::Single,
            flags: IntentFlags::default(),
            raw_task: "Update price for SKU ABC-123".into(),
        };
        assert_eq!(intent.identifiers(), vec!["ABC-123".to_string()]);
        assert!(!intent.is_bulk());
    }
}
