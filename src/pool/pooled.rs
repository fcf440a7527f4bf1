//! Checked-out connection handle.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OwnedSemaphorePermit;

use super::SourcePool;
use crate::config::DataSourceId;
use crate::connection::{DriverConnection, DriverError, DriverResult, RowSet};

/// A live connection lent to one caller.
///
/// Hand it back with [`ConnectionPool::release`](super::ConnectionPool::release)
/// or [`ConnectionPool::invalidate`](super::ConnectionPool::invalidate).
/// Dropping it without either closes the connection: after a cancelled
/// call its protocol state is unknown.
pub struct PooledConnection {
    pub(super) conn: Option<Box<dyn DriverConnection>>,
    pub(super) source: Arc<SourcePool>,
    pub(super) reused: bool,
    pub(super) _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn data_source(&self) -> &DataSourceId {
        &self.source.descriptor.id
    }

    /// Whether the handle came from the idle set rather than a fresh connect.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    fn returned() -> DriverError {
        DriverError::Transport("connection already returned to the pool".to_string())
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("data_source", self.data_source())
            .field("reused", &self.reused)
            .finish()
    }
}

#[async_trait]
impl DriverConnection for PooledConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> DriverResult<RowSet> {
        match self.conn.as_mut() {
            Some(conn) => conn.query(sql, params).await,
            None => Err(Self::returned()),
        }
    }

    async fn ping(&mut self) -> DriverResult<()> {
        match self.conn.as_mut() {
            Some(conn) => conn.ping().await,
            None => Err(Self::returned()),
        }
    }

    async fn close(mut self: Box<Self>) -> DriverResult<()> {
        match self.conn.take() {
            Some(conn) => {
                self.source.forget();
                conn.close().await
            }
            None => Ok(()),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!(data_source = %self.data_source(), "pooled connection dropped without release, closing");
            self.source.discard_detached(conn);
        }
    }
}
