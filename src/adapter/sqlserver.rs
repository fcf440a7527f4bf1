//! SQL Server metadata adapter.
//!
//! Catalog = database. Every query reaches into the target database with
//! three-part names, so one session serves all catalogs. An unknown
//! database (error 911) lists nothing.

use async_trait::async_trait;

use super::helpers::{self, Binder, Placeholder};
use super::{AdapterResult, DriverAdapter};
use crate::config::Engine;
use crate::connection::DriverConnection;
use crate::error::FailureKind;
use crate::metadata::{ColumnInfo, IdentifierCase, IndexInfo, NamePattern, TableEntry};

/// SQL Server metadata adapter.
#[derive(Debug, Clone, Copy)]
pub struct SqlServer;

const PLACEHOLDER: Placeholder = Placeholder::AtP;

impl SqlServer {
    fn pattern(&self, pattern: &NamePattern) -> String {
        helpers::escape_bracket(&pattern.resolve(self.identifier_case()))
    }
}

#[async_trait]
impl DriverAdapter for SqlServer {
    fn engine(&self) -> Engine {
        Engine::SqlServer
    }

    fn identifier_case(&self) -> IdentifierCase {
        IdentifierCase::Preserve
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_bracket(ident)
    }

    fn classify_code(&self, code: Option<&str>, _message: &str) -> FailureKind {
        match code.unwrap_or_default() {
            "229" | "230" | "262" | "297" | "916" | "18456" => FailureKind::PermissionDenied,
            "208" | "911" | "2812" | "15151" => FailureKind::ObjectNotFound,
            "-2" | "1222" => FailureKind::Timeout,
            "-1" | "64" | "233" | "10053" | "10054" => FailureKind::ConnectionLost,
            _ => FailureKind::Other,
        }
    }

    async fn list_catalogs(&self, conn: &mut dyn DriverConnection) -> AdapterResult<Vec<String>> {
        let binder = Binder::new(PLACEHOLDER);
        let sql = "SELECT name FROM sys.databases \
                   WHERE HAS_DBACCESS(name) = 1 AND state_desc = 'ONLINE' ORDER BY name";
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
            "SELECT SCHEMA_NAME FROM {}.INFORMATION_SCHEMA.SCHEMATA",
            self.quote_identifier(catalog)
        );
        if let Some(p) = pattern {
            let ph = binder.bind(self.pattern(p));
            sql.push_str(" WHERE ");
            sql.push_str(&helpers::like_escaped("SCHEMA_NAME", &ph));
        }
        sql.push_str(" ORDER BY SCHEMA_NAME");

        let result = helpers::fetch(self, conn, &sql, &binder)
            .await
            .map(|rows| helpers::decode_names(&rows));
        helpers::or_empty(result)
    }

    async fn list_tables(
        &self,
        conn: &mut dyn DriverConnection,
        catalog: &str,
        schema: &str,
        pattern: Option<&NamePattern>,
    ) -> AdapterResult<Vec<TableEntry>> {
        let db = self.quote_identifier(catalog);
        let mut binder = Binder::new(PLACEHOLDER);
        let mut sql = format!(
            "SELECT t.TABLE_NAME, t.TABLE_TYPE, CAST(ep.value AS nvarchar(4000)) \
             FROM {db}.INFORMATION_SCHEMA.TABLES t \
             LEFT JOIN {db}.sys.extended_properties ep \
               ON ep.major_id = OBJECT_ID(QUOTENAME(t.TABLE_CATALOG) + '.' + QUOTENAME(t.TABLE_SCHEMA) + '.' + QUOTENAME(t.TABLE_NAME)) \
              AND ep.minor_id = 0 AND ep.class = 1 AND ep.name = 'MS_Description' \
             WHERE t.TABLE_SCHEMA = {}",
            binder.bind(schema),
            db = db
        );
        if let Some(p) = pattern {
            let ph = binder.bind(self.pattern(p));
            sql.push_str(" AND ");
            sql.push_str(&helpers::like_escaped("t.TABLE_NAME", &ph));
        }
        sql.push_str(" ORDER BY t.TABLE_NAME");

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
        let db = self.quote_identifier(catalog);
        let mut binder = Binder::new(PLACEHOLDER);
        let sql = format!(
            "SELECT c.COLUMN_NAME, c.ORDINAL_POSITION, c.DATA_TYPE, c.CHARACTER_MAXIMUM_LENGTH, \
             c.NUMERIC_PRECISION, c.NUMERIC_SCALE, c.IS_NULLABLE, c.COLUMN_DEFAULT, \
             CASE WHEN EXISTS ( \
               SELECT 1 FROM {db}.INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
               JOIN {db}.INFORMATION_SCHEMA.KEY_COLUMN_USAGE k \
                 ON k.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA AND k.CONSTRAINT_NAME = tc.CONSTRAINT_NAME \
               WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' \
                 AND tc.TABLE_SCHEMA = c.TABLE_SCHEMA AND tc.TABLE_NAME = c.TABLE_NAME \
                 AND k.COLUMN_NAME = c.COLUMN_NAME) THEN 1 ELSE 0 END, \
             NULL \
             FROM {db}.INFORMATION_SCHEMA.COLUMNS c \
             WHERE c.TABLE_SCHEMA = {} AND c.TABLE_NAME = {} \
             ORDER BY c.ORDINAL_POSITION",
            binder.bind(schema),
            binder.bind(table),
            db = db
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
        let db = self.quote_identifier(catalog);
        let mut binder = Binder::new(PLACEHOLDER);
        let sql = format!(
            "SELECT i.name, c.name, i.is_unique, i.is_primary_key \
             FROM {db}.sys.indexes i \
             JOIN {db}.sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
             JOIN {db}.sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id \
             JOIN {db}.sys.objects o ON o.object_id = i.object_id \
             JOIN {db}.sys.schemas s ON s.schema_id = o.schema_id \
             WHERE s.name = {} AND o.name = {} AND i.name IS NOT NULL AND ic.is_included_column = 0 \
             ORDER BY i.name, ic.key_ordinal",
            binder.bind(schema),
            binder.bind(table),
            db = db
        );

        let result = helpers::fetch(self, conn, &sql, &binder)
            .await
            .map(|rows| helpers::group_index_rows(&rows));
        helpers::or_empty(result)
    }
}
