// src/core/rules/raw.rs

//! The on-disk JSON schema for cache rules, deserialized with `serde_json`
//! before being compiled into [`super::compiled::CompiledRuleSet`]. Field and
//! value spellings mirror the cache-filter's own rules document so an
//! operator's existing rules file can be dropped in unchanged.

use serde::{Deserialize, Serialize};

/// What a rule's condition is matched against.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Attribute {
    Column,
    Database,
    Query,
    Table,
    User,
}

/// The comparison a rule condition applies between the attribute and value.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    Like,
    Unlike,
}

/// A single rule: `attribute op value`. Each array element in a rules
/// document's `store`/`use` chain is one of these — there is no grouping or
/// AND-ing of conditions within a rule.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RawCondition {
    pub attribute: Attribute,
    pub op: Operator,
    pub value: String,
}

/// The top-level rules document: separate chains for deciding whether a
/// result should be stored, and whether a later statement may use what's
/// stored. A statement is cacheable if it matches any `store` rule (or the
/// chain is empty), and a cached result may be used if the statement matches
/// any `use` rule (or that chain is empty too).
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RawRuleDocument {
    #[serde(default)]
    pub store: Vec<RawCondition>,
    #[serde(default, rename = "use")]
    pub use_rules: Vec<RawCondition>,
}

impl RawRuleDocument {
    /// Parses either a single rules object, or a top-level array of rules
    /// objects describing several independent rule sets — in which case
    /// their `store`/`use` chains are concatenated into one document, since
    /// this crate evaluates a single combined rule set rather than one per
    /// filter instance.
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(data)?;
        if value.is_array() {
            let docs: Vec<RawRuleDocument> = serde_json::from_value(value)?;
            let mut merged = RawRuleDocument::default();
            for doc in docs {
                merged.store.extend(doc.store);
                merged.use_rules.extend(doc.use_rules);
            }
            Ok(merged)
        } else {
            serde_json::from_value(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_documented_field_names() {
        let json = r#"
        {
            "store": [
                { "attribute": "query", "op": "like", "value": "SELECT .* FROM temp.*" }
            ],
            "use": [
                { "attribute": "user", "op": "=", "value": "bob@%" }
            ]
        }"#;
        let doc = RawRuleDocument::from_json(json).unwrap();
        assert_eq!(doc.store.len(), 1);
        assert_eq!(doc.use_rules.len(), 1);
        assert_eq!(doc.store[0].attribute, Attribute::Query);
        assert_eq!(doc.store[0].op, Operator::Like);
    }

    #[test]
    fn merges_top_level_array_of_rule_sets() {
        let json = r#"[
            {"store": [{"attribute": "database", "op": "=", "value": "a"}]},
            {"use": [{"attribute": "user", "op": "=", "value": "b@%"}]}
        ]"#;
        let doc = RawRuleDocument::from_json(json).unwrap();
        assert_eq!(doc.store.len(), 1);
        assert_eq!(doc.use_rules.len(), 1);
        assert_eq!(doc.store[0].value, "a");
        assert_eq!(doc.use_rules[0].value, "b@%");
    }

    #[test]
    fn flat_store_entry_matches_spec_example() {
        let json = r#"{"store":[{"attribute":"database","op":"=","value":"sales"}]}"#;
        let doc = RawRuleDocument::from_json(json).unwrap();
        assert_eq!(doc.store.len(), 1);
        assert_eq!(doc.store[0].attribute, Attribute::Database);
        assert_eq!(doc.store[0].op, Operator::Eq);
        assert_eq!(doc.store[0].value, "sales");
    }
}
