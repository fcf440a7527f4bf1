//! Sessions hosted by the driver worker.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{DriverConnection, DriverError, DriverResult, RowSet};
use crate::config::Engine;
use crate::worker::{WorkerClient, WorkerError};

/// One worker session. Dropping it without `close` leaks the session until
/// the worker exits.
pub struct WorkerConnection {
    client: Arc<WorkerClient>,
    session_id: String,
    engine: Engine,
}

impl WorkerConnection {
    pub async fn open(client: Arc<WorkerClient>, engine: Engine, dsn: &str) -> DriverResult<Self> {
        let opened = client
            .open_session(engine.as_str(), dsn)
            .await
            .map_err(|e| match e {
                WorkerError::ConnectionFailed {
                    vendor_code,
                    message,
                } => DriverError::Connect {
                    code: vendor_code,
                    message,
                },
                other => from_worker_error(other),
            })?;

        tracing::debug!(
            engine = %engine,
            session = %opened.session_id,
            server_version = ?opened.server_version,
            "worker session opened"
        );
        Ok(Self {
            client,
            session_id: opened.session_id,
            engine,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }
}

#[async_trait]
impl DriverConnection for WorkerConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> DriverResult<RowSet> {
        let resp = self
            .client
            .execute(&self.session_id, sql, params)
            .await
            .map_err(from_worker_error)?;
        let columns = resp.columns.into_iter().map(|c| c.name).collect();
        Ok(RowSet::new(columns, resp.rows))
    }

    async fn ping(&mut self) -> DriverResult<()> {
        self.client
            .ping_session(&self.session_id)
            .await
            .map_err(from_worker_error)
    }

    async fn close(self: Box<Self>) -> DriverResult<()> {
        self.client
            .close_session(&self.session_id)
            .await
            .map_err(from_worker_error)
    }
}

/// Fold worker failures into driver errors. Anything wrong with the pipe
/// is a transport failure, whatever the database was doing.
pub(crate) fn from_worker_error(err: WorkerError) -> DriverError {
    match err {
        WorkerError::Query {
            code,
            vendor_code,
            message,
        } if code == "TIMEOUT" => DriverError::Timeout(match vendor_code {
            Some(v) => format!("[{}] {}", v, message),
            None => message,
        }),
        WorkerError::Query {
            vendor_code,
            message,
            ..
        } => DriverError::Database {
            code: vendor_code,
            message,
        },
        WorkerError::Timeout(ms) => {
            DriverError::Timeout(format!("worker did not answer within {} ms", ms))
        }
        WorkerError::ConnectionFailed {
            vendor_code,
            message,
        } => DriverError::Database {
            code: vendor_code,
            message,
        },
        other if other.is_transport() => DriverError::Transport(other.to_string()),
        other => DriverError::Database {
            code: None,
            message: other.to_string(),
        },
    }
}
