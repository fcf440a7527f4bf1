//! Introspection orchestration.
//!
//! [`IntrospectionEngine`] owns the process-scoped state (registry, pool,
//! cache, maintenance tasks) and turns a [`SchemaQuery`] into a
//! [`CanonicalSchemaInfo`]:
//!
//! ```text
//! SchemaQuery
//!   │ cache hit ─────────────────────────────────────────────► Arc<CanonicalSchemaInfo>
//!   ▼ miss
//! resolve descriptor + adapter
//!   ▼
//! single-flight fetch ── acquire ── list_* ── release/invalidate
//!   │                        ▲ retry once on ConnectionUnavailable
//!   ▼
//! normalize ── cache store ──────────────────────────────────► Arc<CanonicalSchemaInfo>
//! ```

mod normalize;
mod state;

pub use normalize::normalize;
pub use state::RequestState;

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::adapter::{AdapterError, AdapterResult, DialectRegistry, DriverAdapter};
use crate::cache::{CacheKey, Lookup, MetadataCache};
use crate::config::{
    parse_duration, ConfigError, DataSourceCatalog, DataSourceDescriptor, DataSourceId,
    DataSourceProvider, EngineSettings, Settings, SettingsError,
};
use crate::connection::{Connector, DefaultConnector, DriverConnection};
use crate::error::{FailureKind, IntrospectError, IntrospectResult, Operation};
use crate::metadata::{
    CanonicalSchemaInfo, CatalogInfo, SchemaInfo, SchemaQuery, TableInfo, TableKind,
};
use crate::pool::{ConnectionPool, PoolConfig};
use crate::worker::{WorkerClient, WorkerError};
use state::Tracker;

/// Timeouts and housekeeping cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Bound on one whole request.
    pub request_timeout: Duration,
    /// Bound on one adapter call.
    pub call_timeout: Duration,
    /// How long shutdown waits for borrowed connections.
    pub drain_timeout: Duration,
    /// Period of the cache purge.
    pub maintenance_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(10),
            maintenance_interval: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &EngineSettings) -> Result<Self, SettingsError> {
        let maintenance_interval = parse_duration(&settings.maintenance_interval)?;
        if maintenance_interval.is_zero() {
            return Err(SettingsError::InvalidConfig(
                "engine.maintenance_interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            request_timeout: parse_duration(&settings.request_timeout)?,
            call_timeout: parse_duration(&settings.call_timeout)?,
            drain_timeout: parse_duration(&settings.drain_timeout)?,
            maintenance_interval,
        })
    }
}

/// Failures while bringing the engine up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to start driver worker: {0}")]
    Worker(#[from] WorkerError),
}

/// Assembles an [`IntrospectionEngine`] from explicit parts.
#[derive(Default)]
pub struct EngineBuilder {
    provider: Option<Arc<dyn DataSourceProvider>>,
    catalog: Option<Arc<DataSourceCatalog>>,
    registry: Option<DialectRegistry>,
    connector: Option<Arc<dyn Connector>>,
    pool_config: PoolConfig,
    cache: Option<MetadataCache>,
    config: EngineConfig,
}

impl EngineBuilder {
    /// Use an in-process catalog. It also backs
    /// [`upsert_data_source`](IntrospectionEngine::upsert_data_source).
    pub fn catalog(mut self, catalog: Arc<DataSourceCatalog>) -> Self {
        self.provider = Some(catalog.clone());
        self.catalog = Some(catalog);
        self
    }

    /// Use an external descriptor provider.
    pub fn provider(mut self, provider: Arc<dyn DataSourceProvider>) -> Self {
        self.provider = Some(provider);
        self.catalog = None;
        self
    }

    pub fn registry(mut self, registry: DialectRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    pub fn cache(mut self, cache: MetadataCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Missing parts default to an empty catalog, the built-in adapters, a
    /// SQLite-only connector and a memory-only cache.
    pub fn build(self) -> IntrospectionEngine {
        let catalog = match (&self.provider, self.catalog) {
            (None, _) => Some(Arc::new(DataSourceCatalog::new())),
            (Some(_), catalog) => catalog,
        };
        let provider: Arc<dyn DataSourceProvider> = match (self.provider, &catalog) {
            (Some(provider), _) => provider,
            (None, Some(catalog)) => catalog.clone(),
            (None, None) => Arc::new(DataSourceCatalog::new()),
        };
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(DefaultConnector::sqlite_only()));

        IntrospectionEngine {
            provider,
            catalog,
            registry: Arc::new(self.registry.unwrap_or_default()),
            pool: Arc::new(ConnectionPool::new(connector, self.pool_config)),
            cache: Arc::new(self.cache.unwrap_or_default()),
            config: self.config,
            tasks: Mutex::new(Vec::new()),
        }
    }
}

/// Entry point for metadata requests.
pub struct IntrospectionEngine {
    provider: Arc<dyn DataSourceProvider>,
    catalog: Option<Arc<DataSourceCatalog>>,
    registry: Arc<DialectRegistry>,
    pool: Arc<ConnectionPool>,
    cache: Arc<MetadataCache>,
    config: EngineConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for IntrospectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntrospectionEngine")
            .field("registry", &self.registry.engines())
            .field("pool", &self.pool)
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish()
    }
}

impl IntrospectionEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Build every component from settings and start maintenance.
    ///
    /// The driver worker is spawned when one is configured or found on
    /// `PATH`; without it only SQLite data sources can be reached.
    pub async fn start(settings: &Settings) -> Result<Self, StartupError> {
        let catalog = Arc::new(DataSourceCatalog::from_settings(settings)?);
        let worker = WorkerClient::spawn_with_settings(settings).await?;
        if worker.is_none() {
            info!("no driver worker available, serving embedded engines only");
        }

        let engine = Self::builder()
            .catalog(catalog)
            .connector(Arc::new(DefaultConnector::new(worker.map(Arc::new))))
            .pool_config(PoolConfig::from_settings(&settings.pool)?)
            .cache(MetadataCache::from_settings(&settings.cache)?)
            .config(EngineConfig::from_settings(&settings.engine)?)
            .build();
        engine.spawn_maintenance();

        info!(
            data_sources = engine.catalog.as_ref().map(|c| c.len()).unwrap_or(0),
            "introspection engine started"
        );
        Ok(engine)
    }

    /// Start the idle-connection reaper and the cache purge.
    pub fn spawn_maintenance(&self) {
        let reaper = self.pool.spawn_reaper();

        let cache = Arc::downgrade(&self.cache);
        let period = self.config.maintenance_interval.max(Duration::from_millis(1));
        let purge = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else { break };
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!(purged, "purged expired metadata");
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(reaper);
        tasks.push(purge);
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn registry(&self) -> &DialectRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The writable catalog, if the engine was built with one.
    pub fn catalog(&self) -> Option<&Arc<DataSourceCatalog>> {
        self.catalog.as_ref()
    }

    /// Answer a schema query, from cache when possible.
    pub async fn introspect(&self, query: &SchemaQuery) -> IntrospectResult<Arc<CanonicalSchemaInfo>> {
        let data_source = query.data_source_id().clone();
        let span = info_span!(
            "introspect",
            data_source = %data_source,
            catalog = query.catalog_name.as_deref().unwrap_or("*"),
        );
        let limit = self.config.request_timeout;

        async move {
            match tokio::time::timeout(limit, self.run(query)).await {
                Ok(result) => result,
                Err(_) => {
                    let err = IntrospectError::timeout(data_source, Operation::Request, limit);
                    warn!(error = %err, "request timed out");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, query: &SchemaQuery) -> IntrospectResult<Arc<CanonicalSchemaInfo>> {
        let mut tracker = Tracker::new();
        let key = CacheKey::from_query(query);
        let span = tracing::Span::current();

        tracker.to(RequestState::CacheLookup);
        let result = self
            .cache
            .lookup_or_fetch(key, || {
                tracker.to(RequestState::CacheMiss);
                let prepared = self.prepare(query, &mut tracker);
                async move {
                    match prepared {
                        Ok(fetch) => fetch.run().await,
                        Err(e) => Err(e),
                    }
                }
                .instrument(span)
            })
            .await;

        match result {
            Ok((info, lookup)) => {
                match lookup {
                    Lookup::Hit => tracker.to(RequestState::CacheHit),
                    Lookup::Joined => tracker.to(RequestState::CacheMiss),
                    Lookup::Fetched => {}
                }
                tracker.to(RequestState::Done);
                Ok(info)
            }
            Err(e) => Err(tracker.fail(e)),
        }
    }

    /// Resolve the descriptor and adapter for a cache miss.
    fn prepare(&self, query: &SchemaQuery, tracker: &mut Tracker) -> IntrospectResult<Fetch> {
        tracker.to(RequestState::ResolveAdapter);
        let data_source = query.data_source_id();
        let descriptor = self
            .provider
            .descriptor(data_source)
            .ok_or_else(|| IntrospectError::DataSourceNotFound {
                data_source: data_source.clone(),
                operation: Operation::ResolveDataSource,
            })?;
        let adapter = self
            .registry
            .resolve(descriptor.engine)
            .ok_or_else(|| IntrospectError::UnsupportedEngine {
                data_source: data_source.clone(),
                engine: descriptor.engine,
                operation: Operation::ResolveAdapter,
            })?;

        Ok(Fetch {
            adapter,
            descriptor,
            pool: self.pool.clone(),
            query: query.clone(),
            call_timeout: self.config.call_timeout,
        })
    }

    /// Drop cached metadata and pooled connections of a data source whose
    /// descriptor changed or disappeared.
    ///
    /// Requests still holding an older revision of the descriptor can no
    /// longer borrow connections for it.
    pub async fn data_source_changed(&self, data_source: &DataSourceId) {
        if let Some(current) = self.provider.descriptor(data_source) {
            self.pool.supersede(data_source, current.revision());
        }
        let invalidated = self.cache.invalidate(data_source);
        let closed = self.pool.evict(data_source).await;
        info!(data_source = %data_source, invalidated, closed, "data source changed");
    }

    /// Insert or replace a descriptor in the engine's catalog. Returns
    /// whether an existing, different descriptor was replaced.
    pub async fn upsert_data_source(&self, descriptor: DataSourceDescriptor) -> Result<bool, ConfigError> {
        descriptor.validate()?;
        let catalog = self.writable_catalog(&descriptor.id)?;
        let id = descriptor.id.clone();
        let changed = catalog.upsert(descriptor);
        if changed {
            self.data_source_changed(&id).await;
        }
        Ok(changed)
    }

    /// Remove a descriptor from the engine's catalog. Returns whether it existed.
    pub async fn remove_data_source(&self, data_source: &DataSourceId) -> Result<bool, ConfigError> {
        let catalog = self.writable_catalog(data_source)?;
        let existed = catalog.remove(data_source).is_some();
        self.data_source_changed(data_source).await;
        Ok(existed)
    }

    fn writable_catalog(&self, data_source: &DataSourceId) -> Result<&Arc<DataSourceCatalog>, ConfigError> {
        self.catalog
            .as_ref()
            .ok_or_else(|| ConfigError::InvalidDataSource {
                id: data_source.to_string(),
                reason: "descriptors are managed by an external provider".to_string(),
            })
    }

    /// Stop maintenance, drain borrowed connections and close the pool.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        self.pool.shutdown(self.config.drain_timeout).await;
        info!("introspection engine shut down");
    }
}

/// An adapter failure tagged with the call it came from.
struct CallFailure {
    operation: Operation,
    error: AdapterError,
}

impl CallFailure {
    /// A lost connection on a handle that sat idle in the pool is a stale
    /// handle, which is worth one retry on a fresh connection.
    fn into_error(self, data_source: &DataSourceId, reused: bool) -> IntrospectError {
        let AdapterError {
            kind,
            code,
            message,
        } = self.error;
        if kind == FailureKind::ConnectionLost && reused {
            return IntrospectError::ConnectionUnavailable {
                data_source: data_source.clone(),
                operation: self.operation,
                message: format!("stale pooled connection: {}", message),
            };
        }
        IntrospectError::failure(data_source.clone(), self.operation, kind, code, message)
    }
}

/// One cache miss worth of work. Runs detached from the requesting task.
struct Fetch {
    adapter: Arc<dyn DriverAdapter>,
    descriptor: Arc<DataSourceDescriptor>,
    pool: Arc<ConnectionPool>,
    query: SchemaQuery,
    call_timeout: Duration,
}

impl Fetch {
    async fn run(self) -> IntrospectResult<Arc<CanonicalSchemaInfo>> {
        let mut tracker = Tracker::resume(RequestState::ResolveAdapter);

        let result = match self.attempt(false, &mut tracker).await {
            Err(e) if e.is_retriable() => {
                warn!(error = %e, "retrying once with a fresh connection");
                self.attempt(true, &mut tracker).await
            }
            other => other,
        };

        match result {
            Ok(info) => {
                tracker.to(RequestState::CacheStore);
                Ok(Arc::new(info))
            }
            Err(e) => Err(tracker.fail(e)),
        }
    }

    async fn attempt(&self, fresh: bool, tracker: &mut Tracker) -> IntrospectResult<CanonicalSchemaInfo> {
        tracker.to(RequestState::AcquireConnection);
        let timeout = self.pool.config().acquire_timeout;
        let mut conn = if fresh {
            self.pool.acquire_fresh(&self.descriptor, timeout).await?
        } else {
            self.pool.acquire(&self.descriptor, timeout).await?
        };

        tracker.to(RequestState::Invoke);
        match self.collect(&mut conn).await {
            Ok(info) => {
                self.pool.release(conn).await;
                tracker.to(RequestState::Normalize);
                Ok(normalize(info))
            }
            Err(failure) => {
                let reused = conn.is_reused();
                if failure.error.kind.poisons_connection() {
                    self.pool.invalidate(conn).await;
                } else {
                    self.pool.release(conn).await;
                }
                Err(failure.into_error(&self.descriptor.id, reused))
            }
        }
    }

    async fn call<T>(
        &self,
        operation: Operation,
        call: impl Future<Output = AdapterResult<T>>,
    ) -> Result<T, CallFailure> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(CallFailure { operation, error }),
            Err(_) => Err(CallFailure {
                operation,
                error: AdapterError::new(
                    FailureKind::Timeout,
                    None,
                    format!("call timed out after {:?}", self.call_timeout),
                ),
            }),
        }
    }

    async fn collect(&self, conn: &mut dyn DriverConnection) -> Result<CanonicalSchemaInfo, CallFailure> {
        let adapter = self.adapter.as_ref();
        let query = &self.query;

        let catalogs = match &query.catalog_name {
            Some(name) => vec![name.clone()],
            None => {
                self.call(Operation::ListCatalogs, adapter.list_catalogs(conn))
                    .await?
            }
        };

        let mut catalog_infos = Vec::with_capacity(catalogs.len());
        for catalog in catalogs {
            let schemas = self
                .call(
                    Operation::ListSchemas,
                    adapter.list_schemas(conn, &catalog, query.schema_name_pattern.as_ref()),
                )
                .await?;

            let mut schema_infos = Vec::with_capacity(schemas.len());
            for schema in schemas {
                let tables = self.collect_tables(conn, &catalog, &schema).await?;
                schema_infos.push(SchemaInfo {
                    name: schema,
                    tables,
                });
            }
            catalog_infos.push(CatalogInfo {
                name: catalog,
                schemas: schema_infos,
            });
        }

        Ok(CanonicalSchemaInfo {
            data_source: self.descriptor.id.clone(),
            engine: adapter.engine(),
            identifier_case: adapter.identifier_case(),
            catalogs: catalog_infos,
        })
    }

    async fn collect_tables(
        &self,
        conn: &mut dyn DriverConnection,
        catalog: &str,
        schema: &str,
    ) -> Result<Vec<TableInfo>, CallFailure> {
        let adapter = self.adapter.as_ref();
        let entries = self
            .call(
                Operation::ListTables,
                adapter.list_tables(conn, catalog, schema, self.query.table_name_pattern.as_ref()),
            )
            .await?;

        let mut tables = Vec::with_capacity(entries.len());
        for entry in entries {
            if !self.query.includes_kind(entry.kind) {
                continue;
            }
            let columns = self
                .call(
                    Operation::ListColumns,
                    adapter.list_columns(conn, catalog, schema, &entry.name),
                )
                .await?;
            let indexes = if self.query.includes_indexes() && entry.kind != TableKind::View {
                self.call(
                    Operation::ListIndexes,
                    adapter.list_indexes(conn, catalog, schema, &entry.name),
                )
                .await?
            } else {
                Vec::new()
            };
            tables.push(TableInfo {
                name: entry.name,
                kind: entry.kind,
                comment: entry.comment,
                columns,
                indexes,
            });
        }
        Ok(tables)
    }
}
