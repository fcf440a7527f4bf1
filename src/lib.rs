//! # Schemascope
//!
//! Metadata introspection over heterogeneous databases.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        SchemaQuery (data source, catalog, patterns)     │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [engine]
//! ┌─────────────────────────────────────────────────────────┐
//! │   MetadataCache (TTL, single-flight, optional SQLite)   │
//! └─────────────────────────────────────────────────────────┘
//!                          │ miss
//!                          ▼ [adapter registry]
//! ┌─────────────────────────────────────────────────────────┐
//! │  DriverAdapter: postgres, mysql, sqlserver, oracle,     │
//! │                 sqlite, duckdb                          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [pool]
//! ┌─────────────────────────────────────────────────────────┐
//! │  ConnectionPool ── rusqlite │ driver worker (NDJSON)    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [normalize]
//! ┌─────────────────────────────────────────────────────────┐
//! │     CanonicalSchemaInfo (catalogs → schemas → tables)   │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod cache;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod pool;
pub mod worker;

pub use config::{DataSourceDescriptor, DataSourceId, Engine, Settings};
pub use engine::{EngineBuilder, EngineConfig, IntrospectionEngine, StartupError};
pub use error::{FailureKind, IntrospectError, IntrospectResult, Operation};
pub use metadata::{CanonicalSchemaInfo, NamePattern, ObjectType, SchemaQuery};

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::adapter::{AdapterError, DialectRegistry, DriverAdapter};
    pub use crate::cache::MetadataCache;
    pub use crate::config::{DataSourceCatalog, DataSourceProvider};
    pub use crate::connection::{Connector, DriverConnection, DriverError};
    pub use crate::metadata::{
        CatalogInfo, ColumnInfo, DataType, IndexInfo, SchemaInfo, TableInfo, TableKind,
    };
    pub use crate::pool::{ConnectionPool, PoolConfig};
    pub use crate::{
        CanonicalSchemaInfo, DataSourceDescriptor, DataSourceId, Engine, IntrospectError,
        IntrospectionEngine, NamePattern, ObjectType, SchemaQuery,
    };
}
