//! Error taxonomy for introspection requests.
//!
//! Every variant names the data source and the operation it came from.
//! The type is `Clone` because a single in-flight fetch may have several
//! waiters, and each of them receives the same error.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{DataSourceId, Engine};

/// Result type for introspection requests.
pub type IntrospectResult<T> = Result<T, IntrospectError>;

/// Common classification of engine-specific failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PermissionDenied,
    ObjectNotFound,
    Timeout,
    ConnectionLost,
    /// Unmapped backend error.
    Other,
}

impl FailureKind {
    /// Whether the connection that produced this failure must be discarded.
    pub fn poisons_connection(&self) -> bool {
        matches!(self, FailureKind::ConnectionLost | FailureKind::Timeout)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::PermissionDenied => "permission denied",
            FailureKind::ObjectNotFound => "object not found",
            FailureKind::Timeout => "timeout",
            FailureKind::ConnectionLost => "connection lost",
            FailureKind::Other => "backend error",
        };
        f.write_str(s)
    }
}

/// Step of a request an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ResolveDataSource,
    ResolveAdapter,
    AcquireConnection,
    ListCatalogs,
    ListSchemas,
    ListTables,
    ListColumns,
    ListIndexes,
    /// The request as a whole (request timeout, cancelled fetch).
    Request,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::ResolveDataSource => "resolve_data_source",
            Operation::ResolveAdapter => "resolve_adapter",
            Operation::AcquireConnection => "acquire_connection",
            Operation::ListCatalogs => "list_catalogs",
            Operation::ListSchemas => "list_schemas",
            Operation::ListTables => "list_tables",
            Operation::ListColumns => "list_columns",
            Operation::ListIndexes => "list_indexes",
            Operation::Request => "request",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error)]
pub enum IntrospectError {
    #[error("data source '{data_source}' not found")]
    DataSourceNotFound {
        data_source: DataSourceId,
        operation: Operation,
    },

    #[error("engine '{engine}' of data source '{data_source}' has no introspection adapter")]
    UnsupportedEngine {
        data_source: DataSourceId,
        engine: Engine,
        operation: Operation,
    },

    #[error("connection pool for '{data_source}' exhausted after {waited:?}")]
    PoolExhausted {
        data_source: DataSourceId,
        operation: Operation,
        waited: Duration,
    },

    #[error("connection pool for '{data_source}' is closed")]
    PoolClosed {
        data_source: DataSourceId,
        operation: Operation,
    },

    #[error("{operation} on '{data_source}': connection unavailable: {message}")]
    ConnectionUnavailable {
        data_source: DataSourceId,
        operation: Operation,
        message: String,
    },

    #[error("{operation} on '{data_source}' failed ({kind}): {message}")]
    IntrospectionFailure {
        data_source: DataSourceId,
        operation: Operation,
        kind: FailureKind,
        /// Engine-native code, when one was reported.
        code: Option<String>,
        message: String,
    },
}

impl IntrospectError {
    pub fn failure(
        data_source: DataSourceId,
        operation: Operation,
        kind: FailureKind,
        code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::IntrospectionFailure {
            data_source,
            operation,
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn timeout(data_source: DataSourceId, operation: Operation, after: Duration) -> Self {
        Self::failure(
            data_source,
            operation,
            FailureKind::Timeout,
            None,
            format!("timed out after {:?}", after),
        )
    }

    pub fn data_source(&self) -> &DataSourceId {
        match self {
            Self::DataSourceNotFound { data_source, .. }
            | Self::UnsupportedEngine { data_source, .. }
            | Self::PoolExhausted { data_source, .. }
            | Self::PoolClosed { data_source, .. }
            | Self::ConnectionUnavailable { data_source, .. }
            | Self::IntrospectionFailure { data_source, .. } => data_source,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Self::DataSourceNotFound { operation, .. }
            | Self::UnsupportedEngine { operation, .. }
            | Self::PoolExhausted { operation, .. }
            | Self::PoolClosed { operation, .. }
            | Self::ConnectionUnavailable { operation, .. }
            | Self::IntrospectionFailure { operation, .. } => *operation,
        }
    }

    /// The mapped failure kind, for `IntrospectionFailure`.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::IntrospectionFailure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Only a rejected or stale connection is worth a second attempt.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ConnectionUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let err = IntrospectError::failure(
            "pg".into(),
            Operation::ListTables,
            FailureKind::PermissionDenied,
            Some("42501".to_string()),
            "permission denied for schema hr",
        );
        assert_eq!(err.data_source().as_str(), "pg");
        assert_eq!(err.operation(), Operation::ListTables);
        assert_eq!(err.kind(), Some(FailureKind::PermissionDenied));
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("list_tables on 'pg' failed (permission denied)"));
    }

    #[test]
    fn test_only_connection_unavailable_is_retriable() {
        let unavailable = IntrospectError::ConnectionUnavailable {
            data_source: "x".into(),
            operation: Operation::AcquireConnection,
            message: "refused".to_string(),
        };
        let exhausted = IntrospectError::PoolExhausted {
            data_source: "x".into(),
            operation: Operation::AcquireConnection,
            waited: Duration::ZERO,
        };
        assert!(unavailable.is_retriable());
        assert!(!exhausted.is_retriable());
    }

    #[test]
    fn test_poisoning_kinds() {
        assert!(FailureKind::ConnectionLost.poisons_connection());
        assert!(FailureKind::Timeout.poisons_connection());
        assert!(!FailureKind::PermissionDenied.poisons_connection());
        assert!(!FailureKind::Other.poisons_connection());
    }
}
