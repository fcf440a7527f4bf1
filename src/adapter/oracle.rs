//! Oracle metadata adapter.
//!
//! An Oracle instance is reported as a single catalog named after
//! `DB_NAME`; its users are the schemas. Unquoted names fold to upper case.

use async_trait::async_trait;

use super::helpers::{self, Binder, Placeholder};
use super::{AdapterResult, DriverAdapter};
use crate::config::Engine;
use crate::connection::DriverConnection;
use crate::error::FailureKind;
use crate::metadata::{ColumnInfo, IdentifierCase, IndexInfo, NamePattern, TableEntry};

/// Oracle metadata adapter.
#[derive(Debug, Clone, Copy)]
pub struct Oracle;

const PLACEHOLDER: Placeholder = Placeholder::Colon;

const DB_NAME: &str = "SYS_CONTEXT('USERENV', 'DB_NAME')";

/// `ORA-00942` / `942` / `ORA-942` all become 942.
fn ora_number(code: &str) -> Option<u32> {
    code.trim()
        .trim_start_matches("ORA-")
        .trim_start_matches('0')
        .parse()
        .ok()
}

#[async_trait]
impl DriverAdapter for Oracle {
    fn engine(&self) -> Engine {
        Engine::Oracle
    }

    fn identifier_case(&self) -> IdentifierCase {
        IdentifierCase::Upper
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn classify_code(&self, code: Option<&str>, _message: &str) -> FailureKind {
        match code.and_then(ora_number) {
            Some(1031) | Some(1017) | Some(1045) | Some(1950) => FailureKind::PermissionDenied,
            Some(942) | Some(4043) | Some(1918) => FailureKind::ObjectNotFound,
            Some(1013) | Some(12170) => FailureKind::Timeout,
            Some(3113) | Some(3114) | Some(3135) | Some(12537) | Some(28) => {
                FailureKind::ConnectionLost
            }
            _ => FailureKind::Other,
        }
    }

    async fn list_catalogs(&self, conn: &mut dyn DriverConnection) -> AdapterResult<Vec<String>> {
        let binder = Binder::new(PLACEHOLDER);
        let sql = format!("SELECT {} FROM DUAL", DB_NAME);
        let rows = helpers::fetch(self, conn, &sql, &binder).await?;
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
            "SELECT USERNAME FROM ALL_USERS WHERE {} = {}",
            DB_NAME,
            binder.bind(catalog)
        );
        if let Some(p) = pattern {
            let ph = binder.bind(p.resolve(self.identifier_case()));
            sql.push_str(" AND ");
            sql.push_str(&helpers::like_escaped("USERNAME", &ph));
        }
        sql.push_str(" ORDER BY USERNAME");

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
        let resolved = pattern.map(|p| p.resolve(self.identifier_case()));
        let mut binder = Binder::new(PLACEHOLDER);

        // (source view, name column, reported type)
        let sources = [
            ("ALL_TABLES", "TABLE_NAME", "TABLE"),
            ("ALL_VIEWS", "VIEW_NAME", "VIEW"),
            ("ALL_MVIEWS", "MVIEW_NAME", "MATERIALIZED VIEW"),
        ];

        let mut parts = Vec::with_capacity(sources.len());
        for (view, column, kind) in sources {
            let mut part = format!(
                "SELECT o.{col}, '{kind}', c.COMMENTS FROM {view} o \
                 LEFT JOIN ALL_TAB_COMMENTS c ON c.OWNER = o.OWNER AND c.TABLE_NAME = o.{col} \
                 WHERE {db} = {} AND o.OWNER = {}",
                binder.bind(catalog),
                binder.bind(schema),
                col = column,
                kind = kind,
                view = view,
                db = DB_NAME
            );
            if view == "ALL_TABLES" {
                // Materialized views also appear as their container table
                part.push_str(
                    " AND NOT EXISTS (SELECT 1 FROM ALL_MVIEWS m \
                     WHERE m.OWNER = o.OWNER AND m.MVIEW_NAME = o.TABLE_NAME)",
                );
            }
            if let Some(p) = &resolved {
                let ph = binder.bind(p.as_str());
                part.push_str(" AND ");
                part.push_str(&helpers::like_escaped(&format!("o.{}", column), &ph));
            }
            parts.push(part);
        }

        let sql = format!("{} ORDER BY 1", parts.join(" UNION ALL "));
        let rows = helpers::fetch(self, conn, &sql, &binder).await?;
        Ok(rows.iter().map(helpers::decode_relation).collect())
    }

    async fn list_columns(
        &self,
        conn: &mut dyn DriverConnection,
        catalog: &str,
        schema: &str,
        table: &str,
    ) -> AdapterResult<Vec<ColumnInfo>> {
        let mut binder = Binder::new(PLACEHOLDER);
        let sql = format!(
            "SELECT c.COLUMN_NAME, c.COLUMN_ID, c.DATA_TYPE, c.CHAR_LENGTH, \
             c.DATA_PRECISION, c.DATA_SCALE, c.NULLABLE, c.DATA_DEFAULT, \
             CASE WHEN EXISTS ( \
               SELECT 1 FROM ALL_CONSTRAINTS k \
               JOIN ALL_CONS_COLUMNS kc ON kc.OWNER = k.OWNER AND kc.CONSTRAINT_NAME = k.CONSTRAINT_NAME \
               WHERE k.CONSTRAINT_TYPE = 'P' AND k.OWNER = c.OWNER AND k.TABLE_NAME = c.TABLE_NAME \
                 AND kc.COLUMN_NAME = c.COLUMN_NAME) THEN 1 ELSE 0 END, \
             cc.COMMENTS \
             FROM ALL_TAB_COLUMNS c \
             LEFT JOIN ALL_COL_COMMENTS cc \
               ON cc.OWNER = c.OWNER AND cc.TABLE_NAME = c.TABLE_NAME AND cc.COLUMN_NAME = c.COLUMN_NAME \
             WHERE {} = {} AND c.OWNER = {} AND c.TABLE_NAME = {} \
             ORDER BY c.COLUMN_ID",
            DB_NAME,
            binder.bind(catalog),
            binder.bind(schema),
            binder.bind(table)
        );

        let rows = helpers::fetch(self, conn, &sql, &binder).await?;
        Ok(rows
            .iter()
            .map(helpers::decode_column)
            .map(|mut col| {
                // DATA_DEFAULT is a LONG and keeps the trailing newline of the DDL
                col.default_value = col
                    .default_value
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty());
                col
            })
            .collect())
    }

    async fn list_indexes(
        &self,
        conn: &mut dyn DriverConnection,
        catalog: &str,
        schema: &str,
        table: &str,
    ) -> AdapterResult<Vec<IndexInfo>> {
        let mut binder = Binder::new(PLACEHOLDER);
        let sql = format!(
            "SELECT i.INDEX_NAME, ic.COLUMN_NAME, \
             CASE WHEN i.UNIQUENESS = 'UNIQUE' THEN 1 ELSE 0 END, \
             CASE WHEN EXISTS ( \
               SELECT 1 FROM ALL_CONSTRAINTS k \
               WHERE k.CONSTRAINT_TYPE = 'P' AND k.OWNER = i.TABLE_OWNER \
                 AND k.TABLE_NAME = i.TABLE_NAME AND k.INDEX_NAME = i.INDEX_NAME) THEN 1 ELSE 0 END \
             FROM ALL_INDEXES i \
             JOIN ALL_IND_COLUMNS ic ON ic.INDEX_OWNER = i.OWNER AND ic.INDEX_NAME = i.INDEX_NAME \
             WHERE {} = {} AND i.TABLE_OWNER = {} AND i.TABLE_NAME = {} \
             ORDER BY i.INDEX_NAME, ic.COLUMN_POSITION",
            DB_NAME,
            binder.bind(catalog),
            binder.bind(schema),
            binder.bind(table)
        );

        let rows = helpers::fetch(self, conn, &sql, &binder).await?;
        Ok(helpers::group_index_rows(&rows))
    }
}
