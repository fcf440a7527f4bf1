//! DuckDB metadata adapter.
//!
//! Catalogs are attached databases. DuckDB reports errors by message
//! prefix (`Catalog Error:`, `IO Error:` ...) rather than by code.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::helpers::{self, Binder, Placeholder};
use super::{AdapterResult, DriverAdapter};
use crate::config::Engine;
use crate::connection::DriverConnection;
use crate::error::FailureKind;
use crate::metadata::{ColumnInfo, IdentifierCase, IndexInfo, NamePattern, TableEntry};

/// DuckDB metadata adapter.
#[derive(Debug, Clone, Copy)]
pub struct DuckDb;

const PLACEHOLDER: Placeholder = Placeholder::Question;

static INDEX_KEYS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\bON\s+\S+?\s*\((.*)\)").unwrap());

/// Key columns of a `CREATE INDEX ... ON t(a, b)` statement.
fn index_columns_from_sql(sql: &str) -> Vec<String> {
    let Some(keys) = INDEX_KEYS.captures(sql).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    keys.as_str()
        .split(',')
        .map(|c| c.trim().trim_matches('"').to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

#[async_trait]
impl DriverAdapter for DuckDb {
    fn engine(&self) -> Engine {
        Engine::DuckDb
    }

    fn identifier_case(&self) -> IdentifierCase {
        IdentifierCase::Preserve
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn classify_code(&self, _code: Option<&str>, message: &str) -> FailureKind {
        let head = message.split(':').next().unwrap_or_default().trim();
        match head {
            "Permission Error" => FailureKind::PermissionDenied,
            "Catalog Error" => FailureKind::ObjectNotFound,
            "INTERRUPT Error" | "Interrupt Error" => FailureKind::Timeout,
            "IO Error" | "Connection Error" | "FATAL Error" => FailureKind::ConnectionLost,
            _ => FailureKind::Other,
        }
    }

    async fn list_catalogs(&self, conn: &mut dyn DriverConnection) -> AdapterResult<Vec<String>> {
        let binder = Binder::new(PLACEHOLDER);
        let sql = "SELECT DISTINCT catalog_name FROM information_schema.schemata ORDER BY catalog_name";
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
            "SELECT schema_name FROM information_schema.schemata WHERE catalog_name = {}",
            binder.bind(catalog)
        );
        if let Some(p) = pattern {
            let ph = binder.bind(p.resolve(self.identifier_case()));
            sql.push_str(" AND ");
            sql.push_str(&helpers::like_escaped("schema_name", &ph));
        }
        sql.push_str(" ORDER BY schema_name");

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
        let mut binder = Binder::new(PLACEHOLDER);
        let mut sql = format!(
            "SELECT table_name, table_type, NULL FROM information_schema.tables \
             WHERE table_catalog = {} AND table_schema = {}",
            binder.bind(catalog),
            binder.bind(schema)
        );
        if let Some(p) = pattern {
            let ph = binder.bind(p.resolve(self.identifier_case()));
            sql.push_str(" AND ");
            sql.push_str(&helpers::like_escaped("table_name", &ph));
        }
        sql.push_str(" ORDER BY table_name");

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
            "SELECT c.column_name, c.ordinal_position, c.data_type, c.character_maximum_length, \
             c.numeric_precision, c.numeric_scale, c.is_nullable, c.column_default, \
             EXISTS ( \
               SELECT 1 FROM duckdb_constraints() k \
               WHERE k.constraint_type = 'PRIMARY KEY' \
                 AND k.database_name = c.table_catalog AND k.schema_name = c.table_schema \
                 AND k.table_name = c.table_name \
                 AND list_contains(k.constraint_column_names, c.column_name)), \
             NULL \
             FROM information_schema.columns c \
             WHERE c.table_catalog = {} AND c.table_schema = {} AND c.table_name = {} \
             ORDER BY c.ordinal_position",
            binder.bind(catalog),
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
        // Key constraints are not listed by duckdb_indexes()
        let mut binder = Binder::new(PLACEHOLDER);
        let sql = format!(
            "SELECT COALESCE(constraint_name, table_name || '_' || lower(replace(constraint_type, ' ', '_'))), \
             constraint_type, constraint_column_names \
             FROM duckdb_constraints() \
             WHERE database_name = {} AND schema_name = {} AND table_name = {} \
               AND constraint_type IN ('PRIMARY KEY', 'UNIQUE') \
             ORDER BY 1",
            binder.bind(catalog),
            binder.bind(schema),
            binder.bind(table)
        );
        let rows = helpers::fetch(self, conn, &sql, &binder).await?;
        let mut indexes: Vec<IndexInfo> = rows
            .iter()
            .map(|row| {
                let is_primary = row.str(1) == "PRIMARY KEY";
                IndexInfo {
                    name: row.str(0),
                    columns: helpers::string_list(row.get(2)),
                    is_unique: true,
                    is_primary,
                }
            })
            .collect();

        let mut binder = Binder::new(PLACEHOLDER);
        let sql = format!(
            "SELECT index_name, sql, is_unique, is_primary FROM duckdb_indexes() \
             WHERE database_name = {} AND schema_name = {} AND table_name = {} \
             ORDER BY index_name",
            binder.bind(catalog),
            binder.bind(schema),
            binder.bind(table)
        );
        let rows = helpers::fetch(self, conn, &sql, &binder).await?;
        indexes.extend(rows.iter().map(|row| IndexInfo {
            name: row.str(0),
            columns: index_columns_from_sql(&row.str(1)),
            is_unique: row.bool(2),
            is_primary: row.bool(3),
        }));

        indexes.retain(|i| !i.columns.is_empty());
        Ok(indexes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::ScriptedConnection;
    use crate::connection::DriverError;
    use serde_json::json;

    #[test]
    fn test_index_columns_from_sql() {
        assert_eq!(
            index_columns_from_sql("CREATE UNIQUE INDEX idx ON orders(customer_id, \"Order Date\");"),
            vec!["customer_id", "Order Date"]
        );
        assert!(index_columns_from_sql("garbage").is_empty());
    }

    #[tokio::test]
    async fn test_indexes_merge_constraints_and_indexes() {
        let mut conn = ScriptedConnection::new()
            .respond(
                &["name", "constraint_type", "constraint_column_names"],
                vec![vec![json!("orders_id_pkey"), json!("PRIMARY KEY"), json!(["id"])]],
            )
            .respond(
                &["index_name", "sql", "is_unique", "is_primary"],
                vec![vec![
                    json!("orders_cust"),
                    json!("CREATE INDEX orders_cust ON orders(customer_id);"),
                    json!(false),
                    json!(false),
                ]],
            );
        let indexes = DuckDb
            .list_indexes(&mut conn, "memory", "main", "orders")
            .await
            .unwrap();

        assert_eq!(indexes.len(), 2);
        assert!(indexes[0].is_primary);
        assert_eq!(indexes[0].columns, vec!["id"]);
        assert_eq!(indexes[1].columns, vec!["customer_id"]);
        assert_eq!(conn.calls.len(), 2);
    }

    #[test]
    fn test_message_classification() {
        let err = DriverError::Database {
            code: None,
            message: "Catalog Error: Table with name nope does not exist!".to_string(),
        };
        assert_eq!(DuckDb.classify(&err), FailureKind::ObjectNotFound);
        assert_eq!(
            DuckDb.classify_code(None, "IO Error: Could not set lock on file"),
            FailureKind::ConnectionLost
        );
        assert_eq!(DuckDb.classify_code(None, "Parser Error: syntax"), FailureKind::Other);
    }
}
