//! MySQL / MariaDB metadata adapter.
//!
//! MySQL has no level between server and database, so each database is
//! reported as a catalog holding one schema of the same name.

use async_trait::async_trait;

use super::helpers::{self, Binder, Placeholder};
use super::{AdapterResult, DriverAdapter};
use crate::config::Engine;
use crate::connection::DriverConnection;
use crate::error::FailureKind;
use crate::metadata::{ColumnInfo, IdentifierCase, IndexInfo, NamePattern, TableEntry, TableKind};

/// MySQL metadata adapter.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

const PLACEHOLDER: Placeholder = Placeholder::Question;

// The default LIKE escape is already `\`; spelling it out would need a
// doubled backslash inside a MySQL string literal.
fn like(column: &str, placeholder: &str) -> String {
    format!("{} LIKE {}", column, placeholder)
}

#[async_trait]
impl DriverAdapter for MySql {
    fn engine(&self) -> Engine {
        Engine::MySql
    }

    fn identifier_case(&self) -> IdentifierCase {
        IdentifierCase::Preserve
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn classify_code(&self, code: Option<&str>, _message: &str) -> FailureKind {
        match code.unwrap_or_default() {
            "1044" | "1045" | "1142" | "1143" | "1227" => FailureKind::PermissionDenied,
            "1049" | "1051" | "1146" => FailureKind::ObjectNotFound,
            "1205" | "3024" => FailureKind::Timeout,
            "2002" | "2003" | "2006" | "2013" | "2055" => FailureKind::ConnectionLost,
            _ => FailureKind::Other,
        }
    }

    async fn list_catalogs(&self, conn: &mut dyn DriverConnection) -> AdapterResult<Vec<String>> {
        let binder = Binder::new(PLACEHOLDER);
        let sql = "SELECT SCHEMA_NAME FROM information_schema.SCHEMATA ORDER BY SCHEMA_NAME";
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
            "SELECT SCHEMA_NAME FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = {}",
            binder.bind(catalog)
        );
        if let Some(p) = pattern {
            let ph = binder.bind(p.resolve(self.identifier_case()));
            sql.push_str(" AND ");
            sql.push_str(&like("SCHEMA_NAME", &ph));
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
            "SELECT TABLE_NAME, TABLE_TYPE, TABLE_COMMENT FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = {}",
            binder.bind(schema)
        );
        if let Some(p) = pattern {
            let ph = binder.bind(p.resolve(self.identifier_case()));
            sql.push_str(" AND ");
            sql.push_str(&like("TABLE_NAME", &ph));
        }
        sql.push_str(" ORDER BY TABLE_NAME");

        let rows = helpers::fetch(self, conn, &sql, &binder).await?;
        Ok(rows
            .iter()
            .map(helpers::decode_relation)
            .map(|mut entry| {
                // Views report the literal comment "VIEW"
                if entry.kind == TableKind::View && entry.comment.as_deref() == Some("VIEW") {
                    entry.comment = None;
                }
                entry
            })
            .collect())
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
            "SELECT COLUMN_NAME, ORDINAL_POSITION, COLUMN_TYPE, CHARACTER_MAXIMUM_LENGTH, \
             NUMERIC_PRECISION, NUMERIC_SCALE, IS_NULLABLE, COLUMN_DEFAULT, \
             COLUMN_KEY = 'PRI', COLUMN_COMMENT \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {} \
             ORDER BY ORDINAL_POSITION",
            binder.bind(schema),
            binder.bind(table)
        );

        let rows = helpers::fetch(self, conn, &sql, &binder).await?;
        Ok(rows.iter().map(helpers::decode_column).collect())
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
            "SELECT INDEX_NAME, COLUMN_NAME, NON_UNIQUE = 0, INDEX_NAME = 'PRIMARY' \
             FROM information_schema.STATISTICS \
             WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {} \
             ORDER BY INDEX_NAME, SEQ_IN_INDEX",
            binder.bind(schema),
            binder.bind(table)
        );

        let rows = helpers::fetch(self, conn, &sql, &binder).await?;
        Ok(helpers::group_index_rows(&rows))
    }
}
