//! Shared fixtures: an in-memory connector and a scripted adapter.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use schemascope::adapter::{AdapterError, AdapterResult, DialectRegistry, DriverAdapter};
use schemascope::config::{DataSourceCatalog, DataSourceDescriptor, Engine};
use schemascope::connection::{Connector, DriverConnection, DriverError, DriverResult, RowSet};
use schemascope::engine::{EngineConfig, IntrospectionEngine};
use schemascope::metadata::{
    ColumnInfo, DataType, IdentifierCase, IndexInfo, NamePattern, TableEntry, TableKind,
};
use schemascope::pool::PoolConfig;
use schemascope::FailureKind;

/// Connection counters shared by a [`FakeConnector`] and its connections.
#[derive(Debug, Default)]
pub struct Counters {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub pings: AtomicUsize,
    /// Remaining connect attempts that fail.
    pub failing_connects: AtomicUsize,
    pub ping_fails: AtomicBool,
}

impl Counters {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct FakeConnection {
    counters: Arc<Counters>,
}

#[async_trait]
impl DriverConnection for FakeConnection {
    async fn query(&mut self, _sql: &str, _params: &[Value]) -> DriverResult<RowSet> {
        Ok(RowSet::default())
    }

    async fn ping(&mut self) -> DriverResult<()> {
        self.counters.pings.fetch_add(1, Ordering::SeqCst);
        if self.counters.ping_fails.load(Ordering::SeqCst) {
            return Err(DriverError::Transport("connection reset".to_string()));
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> DriverResult<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub counters: Arc<Counters>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _descriptor: &DataSourceDescriptor,
    ) -> DriverResult<Box<dyn DriverConnection>> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .counters
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DriverError::Connect {
                code: Some("08001".to_string()),
                message: "connection refused".to_string(),
            });
        }
        Ok(Box::new(FakeConnection {
            counters: self.counters.clone(),
        }))
    }
}

/// catalog -> schema -> tables
pub type Layout = BTreeMap<String, BTreeMap<String, Vec<(String, TableKind)>>>;

/// Adapter serving a fixed layout, with call counters and injectable faults.
#[derive(Debug)]
pub struct ScriptedAdapter {
    engine: Engine,
    layout: Layout,
    /// Catalog order as the engine would report it.
    catalog_order: Vec<String>,
    pub catalog_calls: AtomicUsize,
    pub schema_calls: AtomicUsize,
    pub index_calls: AtomicUsize,
    delay: Mutex<Duration>,
    table_failures: Mutex<VecDeque<FailureKind>>,
}

impl ScriptedAdapter {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            layout: Layout::new(),
            catalog_order: Vec::new(),
            catalog_calls: AtomicUsize::new(0),
            schema_calls: AtomicUsize::new(0),
            index_calls: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            table_failures: Mutex::new(VecDeque::new()),
        }
    }

    pub fn table(mut self, catalog: &str, schema: &str, name: &str, kind: TableKind) -> Self {
        if !self.catalog_order.iter().any(|c| c == catalog) {
            self.catalog_order.push(catalog.to_string());
        }
        self.layout
            .entry(catalog.to_string())
            .or_default()
            .entry(schema.to_string())
            .or_default()
            .push((name.to_string(), kind));
        self
    }

    /// Make `list_catalogs` wait before answering.
    pub fn delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = delay;
        self
    }

    /// Fail the next `list_tables` call with `kind`.
    pub fn fail_next_tables(&self, kind: FailureKind) {
        self.table_failures.lock().unwrap().push_back(kind);
    }

    pub fn catalog_calls(&self) -> usize {
        self.catalog_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriverAdapter for ScriptedAdapter {
    fn engine(&self) -> Engine {
        self.engine
    }

    fn identifier_case(&self) -> IdentifierCase {
        IdentifierCase::Lower
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident)
    }

    fn classify_code(&self, _code: Option<&str>, _message: &str) -> FailureKind {
        FailureKind::Other
    }

    async fn list_catalogs(&self, conn: &mut dyn DriverConnection) -> AdapterResult<Vec<String>> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        conn.query("SELECT 1", &[])
            .await
            .map_err(|e| self.adapter_error(e))?;
        Ok(self.catalog_order.clone())
    }

    async fn list_schemas(
        &self,
        _conn: &mut dyn DriverConnection,
        catalog: &str,
        pattern: Option<&NamePattern>,
    ) -> AdapterResult<Vec<String>> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        let case = self.identifier_case();
        Ok(self
            .layout
            .get(catalog)
            .map(|schemas| {
                schemas
                    .keys()
                    .filter(|s| pattern.map(|p| p.matches(s, case)).unwrap_or(true))
                    .rev()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_tables(
        &self,
        _conn: &mut dyn DriverConnection,
        catalog: &str,
        schema: &str,
        pattern: Option<&NamePattern>,
    ) -> AdapterResult<Vec<TableEntry>> {
        if let Some(kind) = self.table_failures.lock().unwrap().pop_front() {
            return Err(AdapterError::new(kind, Some("X1".to_string()), "injected failure"));
        }
        let case = self.identifier_case();
        Ok(self
            .layout
            .get(catalog)
            .and_then(|schemas| schemas.get(schema))
            .map(|tables| {
                tables
                    .iter()
                    .filter(|(name, _)| pattern.map(|p| p.matches(name, case)).unwrap_or(true))
                    .map(|(name, kind)| TableEntry {
                        name: name.clone(),
                        kind: *kind,
                        comment: None,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_columns(
        &self,
        _conn: &mut dyn DriverConnection,
        _catalog: &str,
        _schema: &str,
        _table: &str,
    ) -> AdapterResult<Vec<ColumnInfo>> {
        Ok(vec![
            ColumnInfo {
                name: "name".to_string(),
                ordinal_position: 2,
                data_type: DataType::from_native("varchar(40)", None, None, None),
                nullable: true,
                default_value: None,
                is_primary_key: false,
                comment: None,
            },
            ColumnInfo {
                name: "id".to_string(),
                ordinal_position: 1,
                data_type: DataType::from_native("bigint", None, None, None),
                nullable: false,
                default_value: None,
                is_primary_key: true,
                comment: None,
            },
        ])
    }

    async fn list_indexes(
        &self,
        _conn: &mut dyn DriverConnection,
        _catalog: &str,
        _schema: &str,
        table: &str,
    ) -> AdapterResult<Vec<IndexInfo>> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![IndexInfo {
            name: format!("{}_pkey", table),
            columns: vec!["id".to_string()],
            is_unique: true,
            is_primary: true,
        }])
    }
}

/// Two catalogs reported out of order, each with a `public` schema.
pub fn warehouse_adapter() -> ScriptedAdapter {
    ScriptedAdapter::new(Engine::Postgres)
        .table("B", "public", "orders", TableKind::Table)
        .table("B", "public", "customers", TableKind::Table)
        .table("A", "public", "orders", TableKind::Table)
        .table("A", "public", "order_totals", TableKind::View)
        .table("A", "public", "customers", TableKind::Table)
        .table("A", "staging", "raw_orders", TableKind::Table)
}

pub fn postgres(id: &str) -> DataSourceDescriptor {
    DataSourceDescriptor::network(id, Engine::Postgres, "db.internal", "warehouse")
}

pub struct Harness {
    pub engine: IntrospectionEngine,
    pub adapter: Arc<ScriptedAdapter>,
    pub counters: Arc<Counters>,
    pub catalog: Arc<DataSourceCatalog>,
}

pub fn harness(adapter: ScriptedAdapter) -> Harness {
    harness_with(adapter, PoolConfig::default(), EngineConfig::default())
}

pub fn harness_with(adapter: ScriptedAdapter, pool: PoolConfig, config: EngineConfig) -> Harness {
    let adapter = Arc::new(adapter);
    let connector = FakeConnector::default();
    let counters = connector.counters.clone();

    let catalog = Arc::new(DataSourceCatalog::new());
    catalog.upsert(postgres("pg"));

    let engine = IntrospectionEngine::builder()
        .catalog(catalog.clone())
        .registry(DialectRegistry::with_adapters([
            adapter.clone() as Arc<dyn DriverAdapter>
        ]))
        .connector(Arc::new(connector))
        .pool_config(pool)
        .config(config)
        .build();

    Harness {
        engine,
        adapter,
        counters,
        catalog,
    }
}
