// src/core/rules/mod.rs

//! The cache-filter rule engine: loads a JSON rules document describing
//! `store` and `use` condition chains, compiles it once, and answers two
//! questions for every statement — should this result be stored, and may an
//! already-cached result be used for it.

pub mod compiled;
pub mod raw;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::errors::ProxyError;
pub use compiled::{CompiledRuleSet, MatchContext};
pub use raw::{Attribute, Operator, RawRuleDocument};

/// A hot-swappable compiled rule set. Reloading compiles a fresh
/// [`CompiledRuleSet`] and swaps the `Arc` under a short-lived write lock, so
/// in-flight evaluations never observe a half-updated document.
pub struct RuleEngine {
    current: RwLock<Arc<CompiledRuleSet>>,
}

impl RuleEngine {
    pub fn empty() -> Self {
        Self {
            current: RwLock::new(Arc::new(CompiledRuleSet::default())),
        }
    }

    pub fn from_json(data: &str) -> Result<Self, ProxyError> {
        let doc = RawRuleDocument::from_json(data)?;
        let compiled = CompiledRuleSet::compile(&doc)?;
        Ok(Self {
            current: RwLock::new(Arc::new(compiled)),
        })
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ProxyError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Compiles a new document and atomically swaps it in. An error leaves
    /// the previously loaded rule set in effect.
    pub fn reload_file(&self, path: impl AsRef<Path>) -> Result<(), ProxyError> {
        let data = std::fs::read_to_string(path)?;
        self.reload_json(&data)
    }

    pub fn reload_json(&self, data: &str) -> Result<(), ProxyError> {
        let doc = RawRuleDocument::from_json(data)?;
        let compiled = CompiledRuleSet::compile(&doc)?;
        *self.current.write() = Arc::new(compiled);
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<CompiledRuleSet> {
        self.current.read().clone()
    }

    pub fn should_store(&self, ctx: &MatchContext) -> bool {
        self.current.read().should_store(ctx)
    }

    pub fn should_use(&self, ctx: &MatchContext) -> bool {
        self.current.read().should_use(ctx)
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::{CanonicalParser, SqlParser};

    #[test]
    fn reload_replaces_rules_atomically() {
        let engine = RuleEngine::from_json(
            r#"{"store":[{"attribute":"table","op":"!=","value":"accounts"}]}"#,
        )
        .unwrap();

        let parser = CanonicalParser::default();
        let classified = parser.classify("SELECT * FROM accounts");
        let canonical = parser.canonicalize("SELECT * FROM accounts");
        let ctx = MatchContext {
            canonical_sql: &canonical,
            classifier: &classified,
            user_at_host: "root@localhost",
        };
        assert!(!engine.should_store(&ctx));

        engine.reload_json(r#"{"store":[]}"#).unwrap();
        assert!(engine.should_store(&ctx));
    }

    #[test]
    fn bad_json_leaves_existing_rules_in_effect() {
        let engine = RuleEngine::from_json(r#"{"store":[]}"#).unwrap();
        let err = engine.reload_json("{not json").unwrap_err();
        assert!(matches!(err, ProxyError::RuleJson(_)));

        let parser = CanonicalParser::default();
        let classified = parser.classify("SELECT 1");
        let canonical = parser.canonicalize("SELECT 1");
        let ctx = MatchContext {
            canonical_sql: &canonical,
            classifier: &classified,
            user_at_host: "root@localhost",
        };
        assert!(engine.should_store(&ctx));
    }
}
