//! SQLite metadata adapter.
//!
//! Catalogs are the attached databases (`main`, `temp`, ...). SQLite has
//! no schema level, so each catalog holds one schema of the same name.
//! Identifiers and `LIKE` are both ASCII case-insensitive.

use async_trait::async_trait;

use super::helpers::{self, Binder, Placeholder};
use super::{AdapterResult, DriverAdapter};
use crate::config::Engine;
use crate::connection::DriverConnection;
use crate::error::FailureKind;
use crate::metadata::{ColumnInfo, IdentifierCase, IndexInfo, NamePattern, TableEntry};

/// SQLite metadata adapter.
#[derive(Debug, Clone, Copy)]
pub struct Sqlite;

const PLACEHOLDER: Placeholder = Placeholder::NumberedQuestion;

#[async_trait]
impl DriverAdapter for Sqlite {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn identifier_case(&self) -> IdentifierCase {
        IdentifierCase::Preserve
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn classify_code(&self, code: Option<&str>, message: &str) -> FailureKind {
        let message = message.to_ascii_lowercase();
        if message.contains("unknown database") || message.contains("no such table") {
            return FailureKind::ObjectNotFound;
        }
        match code.unwrap_or_default() {
            "SQLITE_AUTH" | "SQLITE_PERM" => FailureKind::PermissionDenied,
            "SQLITE_BUSY" | "SQLITE_LOCKED" | "SQLITE_INTERRUPT" => FailureKind::Timeout,
            "SQLITE_CANTOPEN" | "SQLITE_IOERR" | "SQLITE_NOTADB" => FailureKind::ConnectionLost,
            _ => FailureKind::Other,
        }
    }

    async fn list_catalogs(&self, conn: &mut dyn DriverConnection) -> AdapterResult<Vec<String>> {
        let binder = Binder::new(PLACEHOLDER);
        let sql = "SELECT name FROM pragma_database_list ORDER BY name";
        let rows = helpers::fetch(self, conn, sql, &binder).await?;
        Ok(helpers::decode_names(&rows))
    }

    async fn list_schemas(
        &self,
        conn: &mut dyn DriverConnection,
        catalog: &str,
        pattern: Option<&NamePattern>,
    ) -> AdapterResult<Vec<String>> {
        let mut binder = Binder::new(PLACEHOLDER);
        let mut sql = format!(
            "SELECT name FROM pragma_database_list WHERE name = {}",
            binder.bind(catalog)
        );
        if let Some(p) = pattern {
            let ph = binder.bind(p.resolve(self.identifier_case()));
            sql.push_str(" AND ");
            sql.push_str(&helpers::like_escaped("name", &ph));
        }

        let rows = helpers::fetch(self, conn, &sql, &binder).await?;
        Ok(helpers::decode_names(&rows))
    }

    async fn list_tables(
        &self,
        conn: &mut dyn DriverConnection,
        catalog: &str,
        schema: &str,
        pattern: Option<&NamePattern>,
    ) -> AdapterResult<Vec<TableEntry>> {
        if catalog != schema {
            return Ok(Vec::new());
        }

        let mut binder = Binder::new(PLACEHOLDER);
        let mut sql = format!(
            "SELECT name, \
             CASE WHEN name LIKE 'sqlite\\_%' ESCAPE '\\' THEN 'SYSTEM TABLE' ELSE type END, \
             NULL \
             FROM {}.sqlite_master WHERE type IN ('table', 'view')",
            self.quote_identifier(catalog)
        );
        if let Some(p) = pattern {
            let ph = binder.bind(p.resolve(self.identifier_case()));
            sql.push_str(" AND ");
            sql.push_str(&helpers::like_escaped("name", &ph));
        }
        sql.push_str(" ORDER BY name");

        let result = helpers::fetch(self, conn, &sql, &binder)
            .await
            .map(|rows| rows.iter().map(helpers::decode_relation).collect());
        helpers::or_empty(result)
    }

    async fn list_columns(
        &self,
        conn: &mut dyn DriverConnection,
        catalog: &str,
        schema: &str,
        table: &str,
    ) -> AdapterResult<Vec<ColumnInfo>> {
        if catalog != schema {
            return Ok(Vec::new());
        }

        let mut binder = Binder::new(PLACEHOLDER);
        let sql = format!(
            "SELECT name, cid + 1, type, NULL, NULL, NULL, \"notnull\" = 0, dflt_value, pk > 0, NULL \
             FROM pragma_table_info({}, {}) ORDER BY cid",
            binder.bind(table),
            binder.bind(catalog)
        );

        let result = helpers::fetch(self, conn, &sql, &binder)
            .await
            .map(|rows| rows.iter().map(helpers::decode_column).collect());
        helpers::or_empty(result)
    }

    async fn list_indexes(
        &self,
        conn: &mut dyn DriverConnection,
        catalog: &str,
        schema: &str,
        table: &str,
    ) -> AdapterResult<Vec<IndexInfo>> {
        if catalog != schema {
            return Ok(Vec::new());
        }

        let mut binder = Binder::new(PLACEHOLDER);
        let sql = format!(
            "SELECT il.name, ii.name, il.\"unique\", il.origin = 'pk' \
             FROM pragma_index_list({}, {}) il \
             JOIN pragma_index_info(il.name, {}) ii \
             ORDER BY il.name, ii.seqno",
            binder.bind(table),
            binder.bind(catalog),
            binder.bind(catalog)
        );

        let result = helpers::fetch(self, conn, &sql, &binder)
            .await
            .map(|rows| helpers::group_index_rows(&rows));
        helpers::or_empty(result)
    }
}
