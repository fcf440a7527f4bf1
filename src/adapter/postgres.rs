//! PostgreSQL metadata adapter.
//!
//! - Catalog = database. Only the connected database exposes its contents;
//!   every other catalog lists no schemas.
//! - Lowercase case folding for unquoted identifiers
//! - Indexes come from `pg_index`, which `information_schema` does not cover
//! - Errors carry a five-character SQLSTATE

use async_trait::async_trait;

use super::helpers::{self, Binder, Placeholder};
use super::{AdapterResult, DriverAdapter};
use crate::config::Engine;
use crate::connection::DriverConnection;
use crate::error::FailureKind;
use crate::metadata::{ColumnInfo, IdentifierCase, IndexInfo, NamePattern, TableEntry};

/// PostgreSQL metadata adapter.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

const PLACEHOLDER: Placeholder = Placeholder::Dollar;

#[async_trait]
impl DriverAdapter for Postgres {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn identifier_case(&self) -> IdentifierCase {
        IdentifierCase::Lower
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn classify_code(&self, code: Option<&str>, _message: &str) -> FailureKind {
        let Some(code) = code else {
            return FailureKind::Other;
        };
        match code {
            "42501" | "28000" | "28P01" => FailureKind::PermissionDenied,
            "3D000" | "3F000" | "42P01" | "42704" => FailureKind::ObjectNotFound,
            "57014" => FailureKind::Timeout,
            "57P01" | "57P02" | "57P03" => FailureKind::ConnectionLost,
            c if c.starts_with("08") => FailureKind::ConnectionLost,
            _ => FailureKind::Other,
        }
    }

    async fn list_catalogs(&self, conn: &mut dyn DriverConnection) -> AdapterResult<Vec<String>> {
        let binder = Binder::new(PLACEHOLDER);
        let sql = "SELECT datname FROM pg_catalog.pg_database \
                   WHERE datallowconn AND NOT datistemplate ORDER BY datname";
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
            "SELECT schema_name FROM information_schema.schemata \
             WHERE catalog_name::text = {} \
             AND schema_name !~ '^pg_(toast|temp_)'",
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
        let resolved = pattern.map(|p| p.resolve(self.identifier_case()));

        let mut tables = format!(
            "SELECT t.table_name, t.table_type, \
             obj_description(format('%I.%I', t.table_schema, t.table_name)::regclass, 'pg_class') \
             FROM information_schema.tables t \
             WHERE t.table_catalog::text = {} AND t.table_schema::text = {}",
            binder.bind(catalog),
            binder.bind(schema)
        );
        if let Some(p) = &resolved {
            let ph = binder.bind(p.as_str());
            tables.push_str(" AND ");
            tables.push_str(&helpers::like_escaped("t.table_name", &ph));
        }

        // information_schema.tables does not list materialized views
        let mut matviews = format!(
            "SELECT m.matviewname, 'MATERIALIZED VIEW', \
             obj_description(format('%I.%I', m.schemaname, m.matviewname)::regclass, 'pg_class') \
             FROM pg_catalog.pg_matviews m \
             WHERE current_database()::text = {} AND m.schemaname::text = {}",
            binder.bind(catalog),
            binder.bind(schema)
        );
        if let Some(p) = &resolved {
            let ph = binder.bind(p.as_str());
            matviews.push_str(" AND ");
            matviews.push_str(&helpers::like_escaped("m.matviewname", &ph));
        }

        let sql = format!("{} UNION ALL {} ORDER BY 1", tables, matviews);
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
            "SELECT c.column_name, c.ordinal_position, \
             CASE WHEN c.data_type IN ('USER-DEFINED', 'ARRAY') THEN c.udt_name::text ELSE c.data_type::text END, \
             c.character_maximum_length, c.numeric_precision, c.numeric_scale, \
             c.is_nullable, c.column_default, \
             EXISTS ( \
               SELECT 1 FROM information_schema.table_constraints tc \
               JOIN information_schema.key_column_usage k \
                 ON k.constraint_schema = tc.constraint_schema \
                AND k.constraint_name = tc.constraint_name \
                AND k.table_name = tc.table_name \
               WHERE tc.constraint_type = 'PRIMARY KEY' \
                 AND tc.table_schema = c.table_schema \
                 AND tc.table_name = c.table_name \
                 AND k.column_name = c.column_name), \
             (SELECT pg_catalog.col_description(a.attrelid, a.attnum) \
                FROM pg_catalog.pg_attribute a \
               WHERE a.attrelid = format('%I.%I', c.table_schema, c.table_name)::regclass \
                 AND a.attname = c.column_name) \
             FROM information_schema.columns c \
             WHERE c.table_catalog::text = {} AND c.table_schema::text = {} AND c.table_name::text = {} \
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
        let mut binder = Binder::new(PLACEHOLDER);
        let sql = format!(
            "SELECT i.relname, a.attname, ix.indisunique, ix.indisprimary \
             FROM pg_catalog.pg_index ix \
             JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid \
             JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid \
             JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace \
             CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) \
             LEFT JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
             WHERE current_database()::text = {} AND n.nspname::text = {} AND t.relname::text = {} \
             ORDER BY i.relname, k.ord",
            binder.bind(catalog),
            binder.bind(schema),
            binder.bind(table)
        );

        let rows = helpers::fetch(self, conn, &sql, &binder).await?;
        Ok(helpers::group_index_rows(&rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::ScriptedConnection;
    use crate::connection::DriverError;
    use serde_json::json;

    #[tokio::test]
    async fn test_list_schemas_folds_unquoted_pattern() {
        let mut conn = ScriptedConnection::new().respond(
            &["schema_name"],
            vec![vec![json!("public")], vec![json!("sales")]],
        );
        let schemas = Postgres
            .list_schemas(&mut conn, "app", Some(&NamePattern::new("S%")))
            .await
            .unwrap();

        assert_eq!(schemas, vec!["public", "sales"]);
        assert!(conn.sql(0).contains("schema_name LIKE $2 ESCAPE '\\'"));
        assert_eq!(conn.params(0), &[json!("app"), json!("s%")]);
    }

    #[tokio::test]
    async fn test_list_tables_includes_matviews() {
        let mut conn = ScriptedConnection::new().respond(
            &["table_name", "table_type", "comment"],
            vec![
                vec![json!("orders"), json!("BASE TABLE"), json!("all orders")],
                vec![json!("order_totals"), json!("MATERIALIZED VIEW"), json!(null)],
                vec![json!("v_orders"), json!("VIEW"), json!(null)],
            ],
        );
        let tables = Postgres
            .list_tables(&mut conn, "app", "public", Some(&NamePattern::new("\"Ord%\"")))
            .await
            .unwrap();

        assert_eq!(tables.len(), 3);
        assert_eq!(tables[0].comment.as_deref(), Some("all orders"));
        assert_eq!(tables[1].kind, crate::metadata::TableKind::MaterializedView);
        assert!(conn.sql(0).contains("pg_matviews"));
        // Quoted pattern stays case-exact in both halves of the union
        assert_eq!(
            conn.params(0),
            &[json!("app"), json!("public"), json!("Ord%"), json!("app"), json!("public"), json!("Ord%")]
        );
    }

    #[tokio::test]
    async fn test_list_columns_decodes_rows() {
        let mut conn = ScriptedConnection::new().respond(
            &["column_name"],
            vec![
                vec![
                    json!("id"), json!(1), json!("integer"), json!(null), json!(32), json!(0),
                    json!("NO"), json!("nextval('orders_id_seq'::regclass)"), json!(true), json!(null),
                ],
                vec![
                    json!("note"), json!(2), json!("character varying"), json!(200), json!(null),
                    json!(null), json!("YES"), json!(null), json!(false), json!("free text"),
                ],
            ],
        );
        let cols = Postgres
            .list_columns(&mut conn, "app", "public", "orders")
            .await
            .unwrap();

        assert_eq!(cols[0].name, "id");
        assert!(cols[0].is_primary_key);
        assert!(!cols[0].nullable);
        assert_eq!(cols[1].data_type.length, Some(200));
        assert_eq!(cols[1].comment.as_deref(), Some("free text"));
    }

    #[tokio::test]
    async fn test_list_indexes_groups_keys() {
        let mut conn = ScriptedConnection::new().respond(
            &["relname", "attname", "indisunique", "indisprimary"],
            vec![
                vec![json!("orders_pkey"), json!("id"), json!(true), json!(true)],
                vec![json!("orders_cust_date"), json!("customer_id"), json!(false), json!(false)],
                vec![json!("orders_cust_date"), json!("ordered_at"), json!(false), json!(false)],
            ],
        );
        let indexes = Postgres
            .list_indexes(&mut conn, "app", "public", "orders")
            .await
            .unwrap();

        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[1].columns, vec!["customer_id", "ordered_at"]);
    }

    #[tokio::test]
    async fn test_errors_are_classified() {
        let mut conn = ScriptedConnection::new()
            .fail(DriverError::database("42501", "permission denied for schema hr"));
        let err = Postgres.list_catalogs(&mut conn).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::PermissionDenied);
        assert_eq!(err.code.as_deref(), Some("42501"));

        assert_eq!(Postgres.classify_code(Some("08006"), ""), FailureKind::ConnectionLost);
        assert_eq!(Postgres.classify_code(Some("57014"), ""), FailureKind::Timeout);
        assert_eq!(Postgres.classify_code(Some("3D000"), ""), FailureKind::ObjectNotFound);
        assert_eq!(Postgres.classify_code(Some("23505"), ""), FailureKind::Other);
        assert_eq!(
            Postgres.classify(&DriverError::Transport("pipe closed".into())),
            FailureKind::ConnectionLost
        );
    }
}
