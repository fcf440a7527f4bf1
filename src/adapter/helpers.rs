//! Shared building blocks for adapter implementations.
//!
//! Adapters select their catalog columns in fixed layouts so the row
//! decoders here can be shared:
//!
//! - relations: `name, type, comment`
//! - columns: `name, ordinal, type, length, precision, scale, nullable,
//!   default, is_primary_key, comment`
//! - index keys: `index_name, column_name, is_unique, is_primary`, ordered
//!   by index name then key position

use serde_json::Value;

use super::{AdapterResult, DriverAdapter};
use crate::connection::{DriverConnection, Row, RowSet};
use crate::error::FailureKind;
use crate::metadata::{ColumnInfo, DataType, IndexInfo, TableEntry, TableKind, ESCAPE};

// =============================================================================
// Identifier Quoting
// =============================================================================

/// Quote identifier with double quotes (ANSI style).
/// Used by: PostgreSQL, Oracle, SQLite, DuckDB
pub fn quote_double(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote identifier with backticks.
/// Used by: MySQL
pub fn quote_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Quote identifier with square brackets.
/// Used by: SQL Server
pub fn quote_bracket(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

// =============================================================================
// Bind Parameters
// =============================================================================

/// Positional placeholder syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `?` (MySQL, DuckDB)
    Question,
    /// `?1`, `?2` (SQLite)
    NumberedQuestion,
    /// `$1`, `$2` (PostgreSQL)
    Dollar,
    /// `:1`, `:2` (Oracle)
    Colon,
    /// `@p1`, `@p2` (SQL Server)
    AtP,
}

impl Placeholder {
    /// Placeholder for the 1-based parameter `n`.
    pub fn render(&self, n: usize) -> String {
        match self {
            Placeholder::Question => "?".to_string(),
            Placeholder::NumberedQuestion => format!("?{}", n),
            Placeholder::Dollar => format!("${}", n),
            Placeholder::Colon => format!(":{}", n),
            Placeholder::AtP => format!("@p{}", n),
        }
    }
}

/// Collects bind values while a statement is assembled.
///
/// Every [`bind`](Binder::bind) call adds a new positional parameter, so a
/// value used twice is bound twice. That keeps `?`-style engines correct.
#[derive(Debug)]
pub struct Binder {
    style: Placeholder,
    params: Vec<Value>,
}

impl Binder {
    pub fn new(style: Placeholder) -> Self {
        Self {
            style,
            params: Vec::new(),
        }
    }

    pub fn bind(&mut self, value: impl Into<Value>) -> String {
        self.params.push(value.into());
        self.style.render(self.params.len())
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

// =============================================================================
// Pattern Translation
// =============================================================================

/// `LIKE` clause with an explicit escape character.
/// Used by: PostgreSQL, Oracle, SQL Server, SQLite, DuckDB
pub fn like_escaped(column: &str, placeholder: &str) -> String {
    format!("{} LIKE {} ESCAPE '{}'", column, placeholder, ESCAPE)
}

/// Escape `[`, which SQL Server treats as a character-class opener.
/// Characters already escaped are left alone.
pub fn escape_bracket(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '[' => {
                out.push(ESCAPE);
                out.push('[');
            }
            other => out.push(other),
        }
    }
    out
}

// =============================================================================
// Execution
// =============================================================================

/// Run a statement and classify any failure with the adapter's rules.
pub async fn fetch<A>(
    adapter: &A,
    conn: &mut dyn DriverConnection,
    sql: &str,
    binder: &Binder,
) -> AdapterResult<RowSet>
where
    A: DriverAdapter + ?Sized,
{
    conn.query(sql, binder.params())
        .await
        .map_err(|e| adapter.adapter_error(e))
}

/// Treat a missing parent object as an empty listing.
pub fn or_empty<T>(result: AdapterResult<Vec<T>>) -> AdapterResult<Vec<T>> {
    match result {
        Err(e) if e.kind == FailureKind::ObjectNotFound => Ok(Vec::new()),
        other => other,
    }
}

// =============================================================================
// Row Decoding
// =============================================================================

pub fn decode_names(rows: &RowSet) -> Vec<String> {
    rows.iter().filter_map(|r| r.non_empty(0)).collect()
}

pub fn decode_relation(row: Row<'_>) -> TableEntry {
    TableEntry {
        name: row.str(0),
        kind: TableKind::from_native(&row.str(1)),
        comment: row.non_empty(2),
    }
}

pub fn decode_column(row: Row<'_>) -> ColumnInfo {
    let length = row.opt_u32(3).filter(|n| *n > 0);
    ColumnInfo {
        name: row.str(0),
        ordinal_position: row.opt_u32(1).unwrap_or(0),
        data_type: DataType::from_native(&row.str(2), length, row.opt_u32(4), row.opt_u32(5)),
        nullable: row.bool(6),
        default_value: row.opt_str(7),
        is_primary_key: row.bool(8),
        comment: row.non_empty(9),
    }
}

/// Fold per-key-column rows into indexes, keeping key order.
/// Rows without a column name (expression keys) are skipped.
pub fn group_index_rows(rows: &RowSet) -> Vec<IndexInfo> {
    let mut indexes: Vec<IndexInfo> = Vec::new();
    for row in rows.iter() {
        let name = row.str(0);
        let column = row.non_empty(1);
        match indexes.last_mut() {
            Some(current) if current.name == name => {
                current.columns.extend(column);
            }
            _ => indexes.push(IndexInfo {
                name,
                columns: column.into_iter().collect(),
                is_unique: row.bool(2),
                is_primary: row.bool(3),
            }),
        }
    }
    indexes.retain(|i| !i.columns.is_empty());
    indexes
}

/// Read a list of names that a driver may return either as a JSON array
/// or as its text rendering (`[a, b]`).
pub fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        Value::String(s) => s
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(|p| p.trim().trim_matches('"').to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
