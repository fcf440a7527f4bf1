//! End-to-end introspection of a shared in-memory SQLite database.

use std::sync::Arc;

use insta::assert_snapshot;
use rusqlite::Connection;
use schemascope::config::{DataSourceCatalog, DataSourceDescriptor};
use schemascope::metadata::{CanonicalSchemaInfo, SchemaQuery, TableKind};
use schemascope::{IntrospectError, IntrospectionEngine};

const SCHEMA: &str = "
    CREATE TABLE customers (
        id INTEGER PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        name VARCHAR(80)
    );
    CREATE TABLE orders (
        id INTEGER PRIMARY KEY,
        customer_id INTEGER NOT NULL REFERENCES customers(id),
        total NUMERIC(10,2) DEFAULT 0,
        placed_at TIMESTAMP
    );
    CREATE INDEX idx_orders_customer ON orders(customer_id, placed_at);
    CREATE VIEW big_orders AS SELECT id, total FROM orders WHERE total > 100;
";

/// Keeps the shared-cache database alive for the duration of a test.
struct Fixture {
    _keepalive: Connection,
    engine: IntrospectionEngine,
}

fn fixture(name: &str) -> Fixture {
    let uri = format!("file:{}?mode=memory&cache=shared", name);
    let keepalive = Connection::open(&uri).unwrap();
    keepalive.execute_batch(SCHEMA).unwrap();

    let catalog = Arc::new(DataSourceCatalog::new());
    catalog.upsert(DataSourceDescriptor::sqlite("local", uri));
    catalog.upsert(DataSourceDescriptor::sqlite("missing", "/nonexistent/dir/app.db"));

    Fixture {
        _keepalive: keepalive,
        engine: IntrospectionEngine::builder().catalog(catalog).build(),
    }
}

fn render(info: &CanonicalSchemaInfo) -> String {
    let mut out = Vec::new();
    for catalog in &info.catalogs {
        for schema in &catalog.schemas {
            for table in &schema.tables {
                let kind = match table.kind {
                    TableKind::View => "view",
                    _ => "table",
                };
                out.push(format!("{}.{} {}", schema.name, table.name, kind));
                for column in &table.columns {
                    let mut line = format!("  {}", column.name);
                    if table.kind != TableKind::View {
                        line.push(' ');
                        line.push_str(&column.data_type.native);
                    }
                    if column.is_primary_key {
                        line.push_str(" pk");
                    }
                    if !column.nullable && !column.is_primary_key {
                        line.push_str(" not null");
                    }
                    if let Some(default) = &column.default_value {
                        line.push_str(&format!(" default {}", default));
                    }
                    out.push(line);
                }
                for index in &table.indexes {
                    let unique = if index.is_unique { "unique " } else { "" };
                    out.push(format!(
                        "  {}index {} ({})",
                        unique,
                        index.name,
                        index.columns.join(", ")
                    ));
                }
            }
        }
    }
    out.join("\n")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_main_catalog() {
    let f = fixture("schemascope_main_catalog");
    let info = f
        .engine
        .introspect(&SchemaQuery::new("local").catalog("main"))
        .await
        .unwrap();

    assert_snapshot!(render(&info), @r"
    main.big_orders view
      id
      total
    main.customers table
      id integer pk
      email text not null
      name varchar(80)
      unique index sqlite_autoindex_customers_1 (email)
    main.orders table
      id integer pk
      customer_id integer not null
      total numeric(10,2) default 0
      placed_at timestamp
      index idx_orders_customer (customer_id, placed_at)
    ");

    let name = info.catalogs[0].schemas[0]
        .table("customers")
        .unwrap()
        .column("name")
        .unwrap();
    assert_eq!(name.data_type.length, Some(80));
    f.engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_catalogs_are_discovered() {
    let f = fixture("schemascope_discovery");
    let info = f.engine.introspect(&SchemaQuery::new("local")).await.unwrap();

    let main = info.catalog("main").unwrap();
    assert_eq!(main.schemas.len(), 1);
    assert_eq!(main.schemas[0].name, "main");
    assert_eq!(info.table_count(), 3);
    f.engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_table_pattern() {
    let f = fixture("schemascope_pattern");
    let info = f
        .engine
        .introspect(&SchemaQuery::new("local").catalog("main").table_pattern("cust%"))
        .await
        .unwrap();

    let tables: Vec<_> = info.catalogs[0].schemas[0]
        .tables
        .iter()
        .map(|t| t.name.as_str())
        .collect();
    assert_eq!(tables, vec!["customers"]);
    f.engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_attached_name_mismatch_is_empty() {
    let f = fixture("schemascope_mismatch");
    let info = f
        .engine
        .introspect(&SchemaQuery::new("local").catalog("aux"))
        .await
        .unwrap();

    assert_eq!(info.catalogs.len(), 1);
    assert!(info.catalogs[0].schemas.is_empty());
    f.engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreadable_file_is_connection_unavailable() {
    let f = fixture("schemascope_unreadable");
    let err = f
        .engine
        .introspect(&SchemaQuery::new("missing"))
        .await
        .unwrap_err();

    assert!(matches!(err, IntrospectError::ConnectionUnavailable { .. }));
    assert_eq!(err.data_source().as_str(), "missing");
}
