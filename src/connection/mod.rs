//! Live database connections.
//!
//! [`DriverConnection`] is the seam between adapters and the driver
//! libraries: it runs one parameterized metadata statement and returns
//! its rows as JSON values. Two implementations exist:
//!
//! - [`SqliteConnection`], in-process through `rusqlite`;
//! - [`WorkerConnection`], a session held by the driver worker.
//!
//! A [`Connector`] opens connections for a descriptor. The pool owns the
//! connector and decides when to call it.

mod row;
mod sqlite;
mod worker;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{DataSourceDescriptor, Engine};
use crate::worker::WorkerClient;

pub use row::{Row, RowSet};
pub use sqlite::SqliteConnection;
pub use worker::WorkerConnection;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors reported by a driver.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// The engine rejected a statement. `code` is the engine-native code.
    #[error("database error{}: {message}", code.as_ref().map(|c| format!(" [{}]", c)).unwrap_or_default())]
    Database {
        code: Option<String>,
        message: String,
    },

    /// Opening the connection failed.
    #[error("connect failed: {message}")]
    Connect {
        code: Option<String>,
        message: String,
    },

    /// The link to the database (or to the worker) is broken.
    #[error("transport error: {0}")]
    Transport(String),

    /// The driver gave up waiting.
    #[error("driver timeout: {0}")]
    Timeout(String),
}

impl DriverError {
    pub fn database(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Engine-native code, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. } | Self::Connect { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Database { message, .. } | Self::Connect { message, .. } => message.clone(),
            Self::Transport(m) | Self::Timeout(m) => m.clone(),
        }
    }
}

/// One open connection to a data source.
///
/// A connection is used by one caller at a time; the pool enforces that.
#[async_trait]
pub trait DriverConnection: Send {
    /// Run a metadata statement with positional bind values.
    async fn query(&mut self, sql: &str, params: &[serde_json::Value]) -> DriverResult<RowSet>;

    /// Cheap liveness check.
    async fn ping(&mut self) -> DriverResult<()>;

    /// Close the connection, releasing server-side resources.
    async fn close(self: Box<Self>) -> DriverResult<()>;
}

/// Opens connections for descriptors.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        descriptor: &DataSourceDescriptor,
    ) -> DriverResult<Box<dyn DriverConnection>>;
}

/// SQLite in-process, every other engine through the driver worker.
pub struct DefaultConnector {
    worker: Option<Arc<WorkerClient>>,
}

impl DefaultConnector {
    pub fn new(worker: Option<Arc<WorkerClient>>) -> Self {
        Self { worker }
    }

    /// A connector that can only serve embedded SQLite data sources.
    pub fn sqlite_only() -> Self {
        Self { worker: None }
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(
        &self,
        descriptor: &DataSourceDescriptor,
    ) -> DriverResult<Box<dyn DriverConnection>> {
        let dsn = descriptor
            .to_connection_string()
            .map_err(|e| DriverError::Connect {
                code: None,
                message: e.to_string(),
            })?;

        match (descriptor.engine, &self.worker) {
            (Engine::Sqlite, _) => Ok(Box::new(SqliteConnection::open(dsn).await?)),
            (engine, Some(worker)) => Ok(Box::new(
                WorkerConnection::open(worker.clone(), engine, &dsn).await?,
            )),
            (engine, None) => Err(DriverError::Connect {
                code: None,
                message: format!("no driver worker configured for engine '{}'", engine),
            }),
        }
    }
}
