// src/core/rules/compiled.rs

//! The compiled form of a rules document: `LIKE`/`UNLIKE` patterns and
//! `user@host` wildcards are pre-compiled to [`regex::Regex`] once, so
//! evaluating a statement against the rule chains never re-compiles a
//! pattern. Mirrors the raw-vs-compiled split the ACL module uses for
//! command/key/channel rules.

use regex::Regex;

use crate::core::errors::ProxyError;
use crate::core::parser::{ClassifierResult, FieldInfo, TableInfo};
use crate::core::rules::raw::{Attribute, Operator, RawCondition, RawRuleDocument};

/// A `column` rule value decomposed per the dotted-qualification rule: a
/// bare column, `table.column`, or `database.table.column`. `column == "*"`
/// matches any column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub database: Option<String>,
    pub table: Option<String>,
    pub column: String,
}

/// A `table` rule value decomposed into `table` or `database.table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub database: Option<String>,
    pub table: String,
}

/// A compiled condition, ready for repeated evaluation.
#[derive(Debug, Clone)]
pub enum CompiledCondition {
    ColumnEq(ColumnSpec),
    ColumnNeq(ColumnSpec),
    ColumnLike(Regex),
    ColumnUnlike(Regex),
    DatabaseEq(String),
    DatabaseNeq(String),
    DatabaseLike(Regex),
    DatabaseUnlike(Regex),
    QueryEq(String),
    QueryNeq(String),
    QueryLike(Regex),
    QueryUnlike(Regex),
    TableEq(TableSpec),
    TableNeq(TableSpec),
    TableLike(Regex),
    TableUnlike(Regex),
    /// `user` conditions compare against `user@host`. An exact match value
    /// with no wildcard compares literally; a value containing `%` or `_`
    /// is upgraded to a regex the same way `LIKE` values are.
    UserEq(String),
    UserNeq(String),
    UserLike(Regex),
    UserUnlike(Regex),
}

/// Turns a SQL `LIKE` pattern (`%` = any run, `_` = any one char) into an
/// anchored regex. Used both for explicit `like`/`unlike` conditions and to
/// upgrade a wildcard-bearing `user` equality value.
fn like_to_regex(pattern: &str) -> Result<Regex, ProxyError> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
            | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(ProxyError::from)
}

fn has_wildcard(value: &str) -> bool {
    value.contains('%') || value.contains('_')
}

/// Splits a `column` rule value on `.`: `column`, `table.column`, or
/// `database.table.column`. More than two dots is a compile error.
fn compile_column_spec(value: &str) -> Result<ColumnSpec, ProxyError> {
    if value == "*" {
        return Ok(ColumnSpec {
            database: None,
            table: None,
            column: "*".to_string(),
        });
    }
    let parts: Vec<&str> = value.split('.').collect();
    match parts.as_slice() {
        [column] => Ok(ColumnSpec {
            database: None,
            table: None,
            column: column.to_string(),
        }),
        [table, column] => Ok(ColumnSpec {
            database: None,
            table: Some(table.to_string()),
            column: column.to_string(),
        }),
        [database, table, column] => Ok(ColumnSpec {
            database: Some(database.to_string()),
            table: Some(table.to_string()),
            column: column.to_string(),
        }),
        _ => Err(ProxyError::RuleCompile(format!(
            "column rule value '{value}' has too many '.'-separated parts"
        ))),
    }
}

/// Splits a `table` rule value on `.`: `table`, or `database.table`. More
/// than one dot is a compile error.
fn compile_table_spec(value: &str) -> Result<TableSpec, ProxyError> {
    let parts: Vec<&str> = value.split('.').collect();
    match parts.as_slice() {
        [table] => Ok(TableSpec {
            database: None,
            table: table.to_string(),
        }),
        [database, table] => Ok(TableSpec {
            database: Some(database.to_string()),
            table: table.to_string(),
        }),
        _ => Err(ProxyError::RuleCompile(format!(
            "table rule value '{value}' has too many '.'-separated parts"
        ))),
    }
}

/// Validates a `database` rule value carries no dots at all.
fn compile_database_value(value: &str) -> Result<String, ProxyError> {
    if value.contains('.') {
        Err(ProxyError::RuleCompile(format!(
            "database rule value '{value}' must not contain '.'"
        )))
    } else {
        Ok(value.to_string())
    }
}

fn compile_condition(cond: &RawCondition) -> Result<CompiledCondition, ProxyError> {
    use Attribute::*;
    use Operator::*;

    Ok(match (cond.attribute, cond.op) {
        (Column, Eq) => CompiledCondition::ColumnEq(compile_column_spec(&cond.value)?),
        (Column, Neq) => CompiledCondition::ColumnNeq(compile_column_spec(&cond.value)?),
        (Column, Like) => CompiledCondition::ColumnLike(like_to_regex(&cond.value)?),
        (Column, Unlike) => CompiledCondition::ColumnUnlike(like_to_regex(&cond.value)?),
        (Database, Eq) => CompiledCondition::DatabaseEq(compile_database_value(&cond.value)?),
        (Database, Neq) => CompiledCondition::DatabaseNeq(compile_database_value(&cond.value)?),
        (Database, Like) => CompiledCondition::DatabaseLike(like_to_regex(&cond.value)?),
        (Database, Unlike) => CompiledCondition::DatabaseUnlike(like_to_regex(&cond.value)?),
        (Query, Eq) => CompiledCondition::QueryEq(cond.value.clone()),
        (Query, Neq) => CompiledCondition::QueryNeq(cond.value.clone()),
        (Query, Like) => CompiledCondition::QueryLike(like_to_regex(&cond.value)?),
        (Query, Unlike) => CompiledCondition::QueryUnlike(like_to_regex(&cond.value)?),
        (Table, Eq) => CompiledCondition::TableEq(compile_table_spec(&cond.value)?),
        (Table, Neq) => CompiledCondition::TableNeq(compile_table_spec(&cond.value)?),
        (Table, Like) => CompiledCondition::TableLike(like_to_regex(&cond.value)?),
        (Table, Unlike) => CompiledCondition::TableUnlike(like_to_regex(&cond.value)?),
        (User, Eq) if has_wildcard(&cond.value) => {
            CompiledCondition::UserLike(like_to_regex(&cond.value)?)
        }
        (User, Eq) => CompiledCondition::UserEq(cond.value.clone()),
        (User, Neq) if has_wildcard(&cond.value) => {
            CompiledCondition::UserUnlike(like_to_regex(&cond.value)?)
        }
        (User, Neq) => CompiledCondition::UserNeq(cond.value.clone()),
        (User, Like) => CompiledCondition::UserLike(like_to_regex(&cond.value)?),
        (User, Unlike) => CompiledCondition::UserUnlike(like_to_regex(&cond.value)?),
    })
}

/// Values a statement is evaluated against. `user` is `user@host` per the
/// session that issued the statement; the rest come from the classifier.
#[derive(Debug, Clone)]
pub struct MatchContext<'a> {
    pub canonical_sql: &'a str,
    pub classifier: &'a ClassifierResult,
    pub user_at_host: &'a str,
}

/// Resolves the effective database for a table reference per §4.2 Column
/// Resolution: use the table's own qualifier if it has one, otherwise fall
/// back to the statement's single mentioned database, if there is exactly
/// one.
fn resolve_database<'a>(own: &'a str, databases: &'a [String]) -> Option<&'a str> {
    if !own.is_empty() {
        Some(own)
    } else if databases.len() == 1 {
        Some(databases[0].as_str())
    } else {
        None
    }
}

/// Resolves the effective table for a field reference: the field's own
/// table if qualified, otherwise the statement's single mentioned table, if
/// there is exactly one.
fn resolve_table<'a>(own: &'a str, tables: &'a [TableInfo]) -> Option<&'a str> {
    if !own.is_empty() {
        Some(own)
    } else if tables.len() == 1 {
        Some(tables[0].table.as_str())
    } else {
        None
    }
}

impl CompiledCondition {
    fn matches_any_table(tables: &[TableInfo], f: impl Fn(&str) -> bool) -> bool {
        tables.iter().any(|t| f(&t.table))
    }

    fn matches_any_database(tables: &[TableInfo], dbs: &[String], f: impl Fn(&str) -> bool) -> bool {
        tables.iter().any(|t| f(&t.database)) || dbs.iter().any(|d| f(d.as_str()))
    }

    fn matches_any_column(fields: &[FieldInfo], f: impl Fn(&str) -> bool) -> bool {
        fields.iter().any(|fld| f(&fld.column))
    }

    /// Matches a [`ColumnSpec`] against every field reference in the
    /// statement, resolving each field's table/database per §4.2 Column
    /// Resolution before comparing.
    fn column_spec_matches(spec: &ColumnSpec, ctx: &MatchContext) -> bool {
        let tables = &ctx.classifier.tables;
        let dbs = &ctx.classifier.databases;
        ctx.classifier.fields.iter().any(|field| {
            if spec.column != "*" && field.column != spec.column {
                return false;
            }
            if let Some(want_table) = &spec.table {
                match resolve_table(&field.table, tables) {
                    Some(table) if table == want_table => {}
                    _ => return false,
                }
            }
            if let Some(want_db) = &spec.database {
                match resolve_database(&field.database, dbs) {
                    Some(db) if db == want_db => {}
                    _ => return false,
                }
            }
            true
        })
    }

    /// Matches a [`TableSpec`] against every table reference, resolving the
    /// table's database per §4.2 Column Resolution before comparing.
    fn table_spec_matches(spec: &TableSpec, ctx: &MatchContext) -> bool {
        let dbs = &ctx.classifier.databases;
        ctx.classifier.tables.iter().any(|table| {
            if table.table != spec.table {
                return false;
            }
            if let Some(want_db) = &spec.database {
                match resolve_database(&table.database, dbs) {
                    Some(db) if db == want_db => {}
                    _ => return false,
                }
            }
            true
        })
    }

    pub fn matches(&self, ctx: &MatchContext) -> bool {
        let tables = &ctx.classifier.tables;
        let dbs = &ctx.classifier.databases;
        let fields = &ctx.classifier.fields;

        match self {
            CompiledCondition::ColumnEq(spec) => Self::column_spec_matches(spec, ctx),
            CompiledCondition::ColumnNeq(spec) => !Self::column_spec_matches(spec, ctx),
            CompiledCondition::ColumnLike(re) => Self::matches_any_column(fields, |c| re.is_match(c)),
            CompiledCondition::ColumnUnlike(re) => {
                !Self::matches_any_column(fields, |c| re.is_match(c))
            }
            CompiledCondition::DatabaseEq(v) => Self::matches_any_database(tables, dbs, |d| d == v),
            CompiledCondition::DatabaseNeq(v) => {
                !Self::matches_any_database(tables, dbs, |d| d == v)
            }
            CompiledCondition::DatabaseLike(re) => {
                Self::matches_any_database(tables, dbs, |d| re.is_match(d))
            }
            CompiledCondition::DatabaseUnlike(re) => {
                !Self::matches_any_database(tables, dbs, |d| re.is_match(d))
            }
            CompiledCondition::QueryEq(v) => ctx.canonical_sql == v,
            CompiledCondition::QueryNeq(v) => ctx.canonical_sql != v,
            CompiledCondition::QueryLike(re) => re.is_match(ctx.canonical_sql),
            CompiledCondition::QueryUnlike(re) => !re.is_match(ctx.canonical_sql),
            CompiledCondition::TableEq(spec) => Self::table_spec_matches(spec, ctx),
            CompiledCondition::TableNeq(spec) => !Self::table_spec_matches(spec, ctx),
            CompiledCondition::TableLike(re) => Self::matches_any_table(tables, |t| re.is_match(t)),
            CompiledCondition::TableUnlike(re) => {
                !Self::matches_any_table(tables, |t| re.is_match(t))
            }
            CompiledCondition::UserEq(v) => ctx.user_at_host == v,
            CompiledCondition::UserNeq(v) => ctx.user_at_host != v,
            CompiledCondition::UserLike(re) => re.is_match(ctx.user_at_host),
            CompiledCondition::UserUnlike(re) => !re.is_match(ctx.user_at_host),
        }
    }
}

/// A fully compiled rules document, ready to gate cache store/use decisions.
/// Each condition is evaluated independently (OR across the chain); there is
/// no grouping of conditions into named, AND'd rules.
#[derive(Debug, Clone, Default)]
pub struct CompiledRuleSet {
    store: Vec<CompiledCondition>,
    use_rules: Vec<CompiledCondition>,
}

impl CompiledRuleSet {
    pub fn compile(doc: &RawRuleDocument) -> Result<Self, ProxyError> {
        let store = doc
            .store
            .iter()
            .map(compile_condition)
            .collect::<Result<Vec<_>, _>>()?;
        let use_rules = doc
            .use_rules
            .iter()
            .map(compile_condition)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { store, use_rules })
    }

    /// A statement is cacheable if the `store` chain is empty (store
    /// everything) or at least one `store` condition matches.
    pub fn should_store(&self, ctx: &MatchContext) -> bool {
        self.store.is_empty() || self.store.iter().any(|c| c.matches(ctx))
    }

    /// A cached result may be reused if the `use` chain is empty (no
    /// restriction) or at least one `use` condition matches.
    pub fn should_use(&self, ctx: &MatchContext) -> bool {
        self.use_rules.is_empty() || self.use_rules.iter().any(|c| c.matches(ctx))
    }

    pub fn store_rule_count(&self) -> usize {
        self.store.len()
    }

    pub fn use_rule_count(&self) -> usize {
        self.use_rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::{CanonicalParser, SqlParser};

    fn classify(sql: &str) -> ClassifierResult {
        CanonicalParser::default().classify(sql)
    }

    #[test]
    fn empty_chains_allow_everything() {
        let set = CompiledRuleSet::default();
        let classified = classify("SELECT * FROM accounts");
        let canonical = CanonicalParser::default().canonicalize("SELECT * FROM accounts");
        let ctx = MatchContext {
            canonical_sql: &canonical,
            classifier: &classified,
            user_at_host: "alice@localhost",
        };
        assert!(set.should_store(&ctx));
        assert!(set.should_use(&ctx));
    }

    #[test]
    fn table_unlike_excludes_matching_table() {
        let doc = RawRuleDocument::from_json(
            r#"{"store":[{"attribute":"table","op":"unlike","value":"temp_%"}]}"#,
        )
        .unwrap();
        let set = CompiledRuleSet::compile(&doc).unwrap();

        let classified = classify("SELECT * FROM temp_sessions");
        let canonical = CanonicalParser::default().canonicalize("SELECT * FROM temp_sessions");
        let ctx = MatchContext {
            canonical_sql: &canonical,
            classifier: &classified,
            user_at_host: "alice@localhost",
        };
        assert!(!set.should_store(&ctx));

        let classified2 = classify("SELECT * FROM accounts");
        let canonical2 = CanonicalParser::default().canonicalize("SELECT * FROM accounts");
        let ctx2 = MatchContext {
            canonical_sql: &canonical2,
            classifier: &classified2,
            user_at_host: "alice@localhost",
        };
        assert!(set.should_store(&ctx2));
    }

    #[test]
    fn user_wildcard_equality_upgrades_to_regex() {
        let doc = RawRuleDocument::from_json(
            r#"{"use":[{"attribute":"user","op":"=","value":"%@10.0.%"}]}"#,
        )
        .unwrap();
        let set = CompiledRuleSet::compile(&doc).unwrap();
        let classified = classify("SELECT 1");
        let canonical = CanonicalParser::default().canonicalize("SELECT 1");

        let internal_ctx = MatchContext {
            canonical_sql: &canonical,
            classifier: &classified,
            user_at_host: "bob@10.0.0.5",
        };
        assert!(set.should_use(&internal_ctx));

        let external_ctx = MatchContext {
            canonical_sql: &canonical,
            classifier: &classified,
            user_at_host: "bob@203.0.113.7",
        };
        assert!(!set.should_use(&external_ctx));
    }

    #[test]
    fn dotted_column_value_matches_qualified_field() {
        let doc = RawRuleDocument::from_json(
            r#"{"store":[{"attribute":"column","op":"=","value":"sales.orders.amount"}]}"#,
        )
        .unwrap();
        let set = CompiledRuleSet::compile(&doc).unwrap();

        let classified = classify("SELECT amount FROM sales.orders");
        let canonical = CanonicalParser::default().canonicalize("SELECT amount FROM sales.orders");
        let ctx = MatchContext {
            canonical_sql: &canonical,
            classifier: &classified,
            user_at_host: "alice@localhost",
        };
        assert!(set.should_store(&ctx));
    }

    #[test]
    fn dotted_column_value_requires_matching_table() {
        let doc = RawRuleDocument::from_json(
            r#"{"store":[{"attribute":"column","op":"=","value":"orders.amount"}]}"#,
        )
        .unwrap();
        let set = CompiledRuleSet::compile(&doc).unwrap();

        let classified = classify("SELECT amount FROM invoices");
        let canonical = CanonicalParser::default().canonicalize("SELECT amount FROM invoices");
        let ctx = MatchContext {
            canonical_sql: &canonical,
            classifier: &classified,
            user_at_host: "alice@localhost",
        };
        assert!(!set.should_store(&ctx));
    }

    #[test]
    fn column_value_with_too_many_dots_fails_to_compile() {
        let doc = RawRuleDocument::from_json(
            r#"{"store":[{"attribute":"column","op":"=","value":"a.b.c.d"}]}"#,
        )
        .unwrap();
        assert!(CompiledRuleSet::compile(&doc).is_err());
    }

    #[test]
    fn database_value_with_dot_fails_to_compile() {
        let doc = RawRuleDocument::from_json(
            r#"{"store":[{"attribute":"database","op":"=","value":"a.b"}]}"#,
        )
        .unwrap();
        assert!(CompiledRuleSet::compile(&doc).is_err());
    }
}
