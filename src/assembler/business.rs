//! Business-logic detection from task text

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::intent::ExtractedIntent;

const BULK_KEYWORDS: &[&str] = &["all", "bulk", "batch", "every", "entire", "mass", "multiple"];
const PRICE_KEYWORDS: &[&str] = &["price", "prices", "pricing", "reprice", "re-price", "discount", "msrp", "cost", "sale"];
const INVENTORY_KEYWORDS: &[&str] = &["inventory", "stock", "restock", "quantity", "qty", "out-of-stock"];

/// Counts below this only mark a bulk operation when a bulk keyword is present
const IMPLICIT_BULK_COUNT: usize = 10;

/// A business pattern recognised in a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusinessPattern {
    BulkOperation {
        item_count: Option<usize>,
        keywords: Vec<String>,
    },
    PriceChange,
    InventoryChange,
}

/// Patterns detected for one task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessLogic {
    pub patterns: Vec<BusinessPattern>,
}

impl BusinessLogic {
    /// Scan `text` for bulk, pricing and inventory signals
    pub fn detect(text: &str) -> Self {
        let words = words(text);
        let mut patterns = Vec::new();

        let bulk_keywords: Vec<String> = BULK_KEYWORDS
            .iter()
            .filter(|k| words.iter().any(|w| w == *k))
            .map(|k| k.to_string())
            .collect();
        let item_count = item_count(text);

        if !bulk_keywords.is_empty() || item_count.is_some_and(|n| n >= IMPLICIT_BULK_COUNT) {
            patterns.push(BusinessPattern::BulkOperation {
                item_count,
                keywords: bulk_keywords,
            });
        }
        if text.contains('$') || PRICE_KEYWORDS.iter().any(|k| words.iter().any(|w| w == k)) {
            patterns.push(BusinessPattern::PriceChange);
        }
        if INVENTORY_KEYWORDS.iter().any(|k| words.iter().any(|w| w == k)) {
            patterns.push(BusinessPattern::InventoryChange);
        }

        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Item count of the bulk pattern, if one was found
    pub fn bulk_item_count(&self) -> Option<usize> {
        self.patterns.iter().find_map(|p| match p {
            BusinessPattern::BulkOperation { item_count, .. } => *item_count,
            _ => None,
        })
    }

    pub fn is_bulk(&self) -> bool {
        self.patterns
            .iter()
            .any(|p| matches!(p, BusinessPattern::BulkOperation { .. }))
    }
}

/// Bulk item list folded into an adaptive bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOperation {
    pub action: String,
    pub item_count: usize,
    pub items: Vec<String>,
}

impl BulkOperation {
    /// Build from a bulk-scoped intent; count falls back to the item list
    pub fn from_intent(intent: &ExtractedIntent, business: &BusinessLogic) -> Self {
        let items = intent.identifiers();
        Self {
            action: intent.action.clone(),
            item_count: business.bulk_item_count().unwrap_or(items.len()),
            items,
        }
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn count_regex() -> Option<&'static Regex> {
    static COUNT: OnceLock<Option<Regex>> = OnceLock::new();
    COUNT
        .get_or_init(|| Regex::new(r"(?:^|\s)(\d+)\s+[a-zA-Z]").ok())
        .as_ref()
}

/// Largest "<number> <noun>" count in `text`
pub fn item_count(text: &str) -> Option<usize> {
    count_regex()?
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<usize>().ok())
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{EntityRef, IntentFlags, Scope};

    #[test]
    fn test_bulk_reprice() {
        let logic = BusinessLogic::detect("Re-price all 500 grinders in the Eureka collection");
        assert!(logic.patterns.contains(&BusinessPattern::BulkOperation {
            item_count: Some(500),
            keywords: vec!["all".into()],
        }));
        assert!(logic.patterns.contains(&BusinessPattern::PriceChange));
        assert_eq!(logic.bulk_item_count(), Some(500));
    }

    #[test]
    fn test_single_price_update_is_not_bulk() {
        let logic = BusinessLogic::detect("Update price for SKU ABC-123 to $49.99");
        assert!(!logic.is_bulk());
        assert_eq!(logic.patterns, vec![BusinessPattern::PriceChange]);
    }

    #[test]
    fn test_inventory() {
        let logic = BusinessLogic::detect("Restock the Mignon grinders");
        assert!(logic.patterns.contains(&BusinessPattern::InventoryChange));
    }

    #[test]
    fn test_item_count_needs_leading_space() {
        assert_eq!(item_count("SKU ABC-123 to x"), None);
        assert_eq!(item_count("12 mugs and 40 grinders"), Some(40));
    }

    #[test]
    fn test_serialized_tag() {
        let json = serde_json::to_value(BusinessPattern::BulkOperation {
            item_count: Some(500),
            keywords: vec![],
        })
        .unwrap();
        assert_eq!(json["type"], "bulk_operation");
        assert_eq!(json["item_count"], 500);
    }

    #[test]
    fn test_bulk_operation_from_intent() {
        let intent = ExtractedIntent {
            entities: vec![
                EntityRef { entity_type: "product".into(), identifier: Some("EUR-01".into()) },
                EntityRef { entity_type: "product".into(), identifier: Some("EUR-02".into()) },
            ],
            action: "update_price".into(),
            scope: Scope::Bulk,
            flags: IntentFlags::default(),
            raw_task: "reprice these".into(),
        };
        let bulk = BulkOperation::from_intent(&intent, &BusinessLogic::default());
        assert_eq!(bulk.item_count, 2);
        assert_eq!(bulk.items, vec!["EUR-01".to_string(), "EUR-02".to_string()]);
    }
}
