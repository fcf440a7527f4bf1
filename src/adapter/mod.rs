//! Per-engine metadata adapters.
//!
//! Each supported engine implements [`DriverAdapter`], which turns the
//! engine's own catalog views into the canonical model. Adapters are
//! stateless unit structs; everything they need arrives through the
//! borrowed connection and the call arguments.
//!
//! | Engine     | Catalog            | Schema          | Placeholders | Folding  |
//! |------------|--------------------|-----------------|--------------|----------|
//! | PostgreSQL | database           | namespace       | `$n`         | lower    |
//! | MySQL      | database           | = catalog       | `?`          | preserve |
//! | SQL Server | database           | schema          | `@pN`        | preserve |
//! | Oracle     | DB_NAME (single)   | user            | `:n`         | upper    |
//! | SQLite     | attached database  | = catalog       | `?n`         | preserve |
//! | DuckDB     | attached database  | schema          | `?`          | preserve |
//!
//! Absence of a parent object (an unknown catalog or schema) yields an empty
//! list rather than an error.

mod duckdb;
pub mod helpers;
mod mysql;
mod oracle;
mod postgres;
mod registry;
mod sqlite;
mod sqlserver;

pub use duckdb::DuckDb;
pub use mysql::MySql;
pub use oracle::Oracle;
pub use postgres::Postgres;
pub use registry::DialectRegistry;
pub use sqlite::Sqlite;
pub use sqlserver::SqlServer;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Engine;
use crate::connection::{DriverConnection, DriverError};
use crate::error::FailureKind;
use crate::metadata::{ColumnInfo, IdentifierCase, IndexInfo, NamePattern, TableEntry};

/// Result type for adapter calls.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// A classified driver failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct AdapterError {
    pub kind: FailureKind,
    /// Engine-native code, when one was reported.
    pub code: Option<String>,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: FailureKind, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }
}

/// Metadata capability set of one engine family.
///
/// The `list_*` calls borrow a connection from the pool for their duration
/// and never keep it.
#[async_trait]
pub trait DriverAdapter: Send + Sync + std::fmt::Debug {
    fn engine(&self) -> Engine;

    /// How the engine folds unquoted identifiers.
    fn identifier_case(&self) -> IdentifierCase;

    /// Quote an identifier for this engine.
    fn quote_identifier(&self, ident: &str) -> String;

    /// Map an engine-native error code (or message, when the engine has no
    /// codes) to the common taxonomy.
    fn classify_code(&self, code: Option<&str>, message: &str) -> FailureKind;

    /// Classify any driver failure. Transport failures are always
    /// [`FailureKind::ConnectionLost`].
    fn classify(&self, err: &DriverError) -> FailureKind {
        match err {
            DriverError::Transport(_) => FailureKind::ConnectionLost,
            DriverError::Timeout(_) => FailureKind::Timeout,
            DriverError::Database { code, message } | DriverError::Connect { code, message } => {
                self.classify_code(code.as_deref(), message)
            }
        }
    }

    /// Wrap a driver failure with its classification.
    fn adapter_error(&self, err: DriverError) -> AdapterError {
        AdapterError {
            kind: self.classify(&err),
            code: err.code().map(String::from),
            message: err.message(),
        }
    }

    async fn list_catalogs(&self, conn: &mut dyn DriverConnection) -> AdapterResult<Vec<String>>;

    async fn list_schemas(
        &self,
        conn: &mut dyn DriverConnection,
        catalog: &str,
        pattern: Option<&NamePattern>,
    ) -> AdapterResult<Vec<String>>;

    async fn list_tables(
        &self,
        conn: &mut dyn DriverConnection,
        catalog: &str,
        schema: &str,
        pattern: Option<&NamePattern>,
    ) -> AdapterResult<Vec<TableEntry>>;

    async fn list_columns(
        &self,
        conn: &mut dyn DriverConnection,
        catalog: &str,
        schema: &str,
        table: &str,
    ) -> AdapterResult<Vec<ColumnInfo>>;

    async fn list_indexes(
        &self,
        conn: &mut dyn DriverConnection,
        catalog: &str,
        schema: &str,
        table: &str,
    ) -> AdapterResult<Vec<IndexInfo>>;
}
