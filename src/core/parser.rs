// src/core/parser.rs

//! The pluggable SQL parser interface consumed by [`crate::core::parsing_cache`]
//! and [`crate::core::rules`]. The real grammar (full MariaDB/MySQL dialect
//! support) is out of scope here, so this module defines only the seam a
//! real parser plugs into, plus a small reference implementation good
//! enough to exercise the cache and rule engine end to end.

use std::fmt;

/// The SQL mode a parser was configured with when it produced a
/// [`ClassifierResult`]. A cache entry is only valid while the thread's
/// current mode matches the mode recorded at insertion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SqlMode {
    #[default]
    Default,
    Oracle,
}

/// The broad statement kind a query classifies as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCode {
    Select,
    Insert,
    Update,
    Delete,
    Begin,
    Commit,
    Rollback,
    Other,
}

impl fmt::Display for OperationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationCode::Select => "SELECT",
            OperationCode::Insert => "INSERT",
            OperationCode::Update => "UPDATE",
            OperationCode::Delete => "DELETE",
            OperationCode::Begin => "BEGIN",
            OperationCode::Commit => "COMMIT",
            OperationCode::Rollback => "ROLLBACK",
            OperationCode::Other => "OTHER",
        };
        write!(f, "{s}")
    }
}

/// A fully-qualified `database.table.column` triple as referenced by a
/// statement. Any component may be empty when the statement didn't qualify
/// it (e.g. an unqualified column); [`crate::core::rules`] fills in defaults
/// from the session / single-table context per its column resolution rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldInfo {
    pub database: String,
    pub table: String,
    pub column: String,
}

/// A `database.table` reference as used by table-level rule matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TableInfo {
    pub database: String,
    pub table: String,
}

/// The result a parser plug-in produces for one statement: everything the
/// rule engine and downstream routers need, without re-parsing. This is the
/// value type [`crate::core::parsing_cache::ParsingCache`] stores.
#[derive(Debug, Clone)]
pub struct ClassifierResult {
    pub operation: OperationCode,
    pub databases: Vec<String>,
    pub tables: Vec<TableInfo>,
    pub fields: Vec<FieldInfo>,
    /// The SQL mode the parser was in when this result was produced.
    pub sql_mode: SqlMode,
    /// An opaque option bitmask the parser was configured with; a cache hit
    /// requires this to still match the thread's current value.
    pub parser_options: u32,
    /// The size in bytes this entry reports itself as, used for the parsing
    /// cache's capacity accounting. Parsers are expected to report a
    /// conservative estimate of their own heap footprint.
    pub self_reported_size: usize,
}

impl ClassifierResult {
    /// A short human-readable summary, used by admin diagnostics.
    pub fn summary(&self) -> String {
        format!(
            "{} tables={} fields={}",
            self.operation,
            self.tables.len(),
            self.fields.len()
        )
    }
}

/// A pluggable SQL parser. A real implementation would wrap a full grammar;
/// this module defines the seam plus a reference implementation,
/// [`CanonicalParser`].
pub trait SqlParser: Send + Sync {
    /// Produces the canonical form of `sql`: literals replaced by
    /// placeholders, whitespace normalized. Used as the parsing-cache key.
    fn canonicalize(&self, sql: &str) -> String;

    /// Fully classifies `sql`, producing the value stored in the parsing
    /// cache. Implementations should treat this as the expensive path; the
    /// cache exists specifically to avoid calling it redundantly.
    fn classify(&self, sql: &str) -> ClassifierResult;

    /// The SQL mode this parser instance is currently configured with.
    fn sql_mode(&self) -> SqlMode;

    /// An opaque bitmask of parser options currently in effect.
    fn options(&self) -> u32;
}

/// A minimal reference [`SqlParser`]: normalizes whitespace, replaces
/// single-quoted strings and bare numeric literals with `?`, and extracts
/// table references well enough to exercise table/database/column rule
/// matching and the parsing cache. Not a full SQL grammar: dialect-specific
/// parsing is handled by whatever production parser implements this trait.
#[derive(Debug, Default, Clone)]
pub struct CanonicalParser {
    mode: SqlMode,
    options: u32,
}

impl CanonicalParser {
    pub fn new(mode: SqlMode, options: u32) -> Self {
        Self { mode, options }
    }
}

impl SqlParser for CanonicalParser {
    fn canonicalize(&self, sql: &str) -> String {
        canonicalize_sql(sql)
    }

    fn classify(&self, sql: &str) -> ClassifierResult {
        let operation = classify_operation(sql);
        let tables = extract_tables(sql);
        let databases: Vec<String> = {
            let mut dbs: Vec<String> = tables
                .iter()
                .filter(|t| !t.database.is_empty())
                .map(|t| t.database.clone())
                .collect();
            dbs.sort();
            dbs.dedup();
            dbs
        };
        let fields = extract_fields(sql, &tables);
        let approx_size = sql.len() + tables.len() * 32 + fields.len() * 48 + 64;

        ClassifierResult {
            operation,
            databases,
            tables,
            fields,
            sql_mode: self.mode,
            parser_options: self.options,
            self_reported_size: approx_size,
        }
    }

    fn sql_mode(&self) -> SqlMode {
        self.mode
    }

    fn options(&self) -> u32 {
        self.options
    }
}

/// Normalizes whitespace to single spaces and replaces string/numeric
/// literals with `?`, producing a stable cache key for structurally
/// identical statements.
pub fn canonicalize_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.trim().chars().peekable();
    let mut last_was_space = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let quote = c;
                while let Some(&next) = chars.peek() {
                    chars.next();
                    if next == quote {
                        break;
                    }
                }
                out.push('?');
                last_was_space = false;
            }
            c if c.is_whitespace() => {
                if !last_was_space && !out.is_empty() {
                    out.push(' ');
                    last_was_space = true;
                }
            }
            c if c.is_ascii_digit() => {
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_digit() || next == '.' {
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push('?');
                last_was_space = false;
            }
            c => {
                out.push(c);
                last_was_space = false;
            }
        }
    }
    out.trim_end().to_string()
}

fn classify_operation(sql: &str) -> OperationCode {
    let upper = sql.trim_start().to_ascii_uppercase();
    if upper.starts_with("SELECT") {
        OperationCode::Select
    } else if upper.starts_with("INSERT") {
        OperationCode::Insert
    } else if upper.starts_with("UPDATE") {
        OperationCode::Update
    } else if upper.starts_with("DELETE") {
        OperationCode::Delete
    } else if upper.starts_with("BEGIN") || upper.starts_with("START TRANSACTION") {
        OperationCode::Begin
    } else if upper.starts_with("COMMIT") {
        OperationCode::Commit
    } else if upper.starts_with("ROLLBACK") {
        OperationCode::Rollback
    } else {
        OperationCode::Other
    }
}

/// Extracts `database.table` references following `FROM`, `JOIN`, `INTO` and
/// `UPDATE` keywords. Deliberately simple: no subquery or CTE awareness.
fn extract_tables(sql: &str) -> Vec<TableInfo> {
    let upper = sql.to_ascii_uppercase();
    let mut tables = Vec::new();
    for keyword in ["FROM", "JOIN", "INTO", "UPDATE"] {
        let mut search_from = 0;
        while let Some(pos) = upper[search_from..].find(keyword) {
            let abs_pos = search_from + pos;
            let after = &sql[abs_pos + keyword.len()..];
            if let Some(ident) = first_identifier(after) {
                tables.push(parse_dotted_table(&ident));
            }
            search_from = abs_pos + keyword.len();
        }
    }
    tables.sort_by(|a, b| (&a.database, &a.table).cmp(&(&b.database, &b.table)));
    tables.dedup();
    tables
}

fn first_identifier(s: &str) -> Option<String> {
    let s = s.trim_start();
    let end = s
        .find(|c: char| c.is_whitespace() || c == ',' || c == '(' || c == ';')
        .unwrap_or(s.len());
    if end == 0 {
        None
    } else {
        Some(s[..end].to_string())
    }
}

fn parse_dotted_table(ident: &str) -> TableInfo {
    match ident.split_once('.') {
        Some((db, table)) => TableInfo {
            database: db.to_string(),
            table: table.to_string(),
        },
        None => TableInfo {
            database: String::new(),
            table: ident.to_string(),
        },
    }
}

/// Extracts column references from the `SELECT` list or `WHERE` clause,
/// filling in the table when exactly one table is referenced.
fn extract_fields(sql: &str, tables: &[TableInfo]) -> Vec<FieldInfo> {
    let upper = sql.to_ascii_uppercase();
    let Some(select_pos) = upper.find("SELECT") else {
        return Vec::new();
    };
    let Some(from_pos) = upper.find("FROM") else {
        return Vec::new();
    };
    if from_pos <= select_pos {
        return Vec::new();
    }

    let select_list = &sql[select_pos + "SELECT".len()..from_pos];
    let default_table = if tables.len() == 1 {
        Some(tables[0].clone())
    } else {
        None
    };

    select_list
        .split(',')
        .filter_map(|raw| {
            let ident = raw.trim().split_whitespace().next()?.trim();
            if ident == "*" || ident.is_empty() {
                return None;
            }
            let (table_part, column) = match ident.rsplit_once('.') {
                Some((t, c)) => (Some(t.to_string()), c.to_string()),
                None => (None, ident.to_string()),
            };
            let (database, table) = if let Some(t) = table_part {
                (String::new(), t)
            } else if let Some(default) = &default_table {
                (default.database.clone(), default.table.clone())
            } else {
                (String::new(), String::new())
            };
            Some(FieldInfo {
                database,
                table,
                column,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_literals_and_whitespace() {
        let a = canonicalize_sql("SELECT  * FROM t   WHERE id = 42");
        let b = canonicalize_sql("select * from t where id=99");
        assert_eq!(a, "SELECT * FROM t WHERE id = ?");
        assert_eq!(a.to_ascii_uppercase(), b.to_ascii_uppercase());
    }

    #[test]
    fn classifies_select_and_extracts_tables() {
        let parser = CanonicalParser::default();
        let result = parser.classify("SELECT name FROM sales.orders WHERE id = 1");
        assert_eq!(result.operation, OperationCode::Select);
        assert_eq!(result.tables.len(), 1);
        assert_eq!(result.tables[0].database, "sales");
        assert_eq!(result.tables[0].table, "orders");
        assert_eq!(result.databases, vec!["sales".to_string()]);
    }

    #[test]
    fn extracts_unqualified_column_with_single_table() {
        let parser = CanonicalParser::default();
        let result = parser.classify("SELECT id, name FROM users");
        assert_eq!(result.fields.len(), 2);
        assert_eq!(result.fields[0].table, "users");
        assert_eq!(result.fields[0].column, "id");
    }
}
