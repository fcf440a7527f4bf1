//! In-process SQLite connections.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{ffi::ErrorCode, params_from_iter, Connection, OpenFlags};
use serde_json::Value;

use super::{DriverConnection, DriverError, DriverResult, RowSet};

/// A `rusqlite` connection driven from async code.
///
/// Every statement runs on the blocking pool; the mutex only guards
/// against the handle being used after `close`.
pub struct SqliteConnection {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteConnection {
    /// Open `dsn`, which is a file path, `:memory:` or a `file:` URI.
    ///
    /// Plain file paths are opened read-only and must exist.
    pub async fn open(dsn: String) -> DriverResult<Self> {
        let conn = tokio::task::spawn_blocking(move || {
            let flags = if dsn == ":memory:" || dsn.starts_with("file:") {
                OpenFlags::default()
            } else {
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX
            };
            Connection::open_with_flags(&dsn, flags).map_err(connect_error)
        })
        .await
        .map_err(|e| DriverError::Transport(format!("sqlite open task failed: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> DriverResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> DriverResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| DriverError::Transport("sqlite connection poisoned".to_string()))?;
            match guard.as_ref() {
                Some(c) => f(c),
                None => Err(DriverError::Transport("sqlite connection closed".to_string())),
            }
        })
        .await
        .map_err(|e| DriverError::Transport(format!("sqlite task failed: {}", e)))?
    }
}

#[async_trait]
impl DriverConnection for SqliteConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> DriverResult<RowSet> {
        let sql = sql.to_string();
        let params: Vec<SqlValue> = params.iter().map(to_sql_value).collect();
        self.with_conn(move |conn| run_query(conn, &sql, params).map_err(query_error))
            .await
    }

    async fn ping(&mut self) -> DriverResult<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(query_error)
        })
        .await
    }

    async fn close(self: Box<Self>) -> DriverResult<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let taken = conn.lock().ok().and_then(|mut guard| guard.take());
            match taken {
                Some(c) => c.close().map_err(|(_, e)| query_error(e)),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| DriverError::Transport(format!("sqlite close task failed: {}", e)))?
    }
}

fn run_query(conn: &Connection, sql: &str, params: Vec<SqlValue>) -> rusqlite::Result<RowSet> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();

    let mut rows = stmt.query(params_from_iter(params))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(from_value_ref(row.get_ref(idx)?));
        }
        out.push(values);
    }
    Ok(RowSet::new(columns, out))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        // Catalog queries never select blobs
        ValueRef::Blob(_) => Value::Null,
    }
}

/// Symbolic name of a SQLite primary result code.
fn code_name(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::PermissionDenied => "SQLITE_PERM",
        ErrorCode::AuthorizationForStatementDenied => "SQLITE_AUTH",
        ErrorCode::DatabaseBusy => "SQLITE_BUSY",
        ErrorCode::DatabaseLocked => "SQLITE_LOCKED",
        ErrorCode::OperationInterrupted => "SQLITE_INTERRUPT",
        ErrorCode::CannotOpen => "SQLITE_CANTOPEN",
        ErrorCode::NotADatabase => "SQLITE_NOTADB",
        ErrorCode::DatabaseCorrupt => "SQLITE_CORRUPT",
        ErrorCode::SystemIoFailure => "SQLITE_IOERR",
        ErrorCode::ReadOnly => "SQLITE_READONLY",
        ErrorCode::NotFound => "SQLITE_NOTFOUND",
        _ => "SQLITE_ERROR",
    }
}

fn query_error(err: rusqlite::Error) -> DriverError {
    match &err {
        rusqlite::Error::SqliteFailure(e, msg) => DriverError::Database {
            code: Some(code_name(e.code).to_string()),
            message: msg.clone().unwrap_or_else(|| err.to_string()),
        },
        _ => DriverError::Database {
            code: None,
            message: err.to_string(),
        },
    }
}

fn connect_error(err: rusqlite::Error) -> DriverError {
    match query_error(err) {
        DriverError::Database { code, message } => DriverError::Connect { code, message },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_query_with_params() {
        let mut conn = SqliteConnection::open(":memory:".to_string()).await.unwrap();
        conn.query("CREATE TABLE t (id INTEGER, name TEXT, score REAL)", &[])
            .await
            .unwrap();
        conn.query(
            "INSERT INTO t VALUES (?1, ?2, ?3), (2, NULL, 1.5)",
            &[json!(1), json!("one"), json!(0.5)],
        )
        .await
        .unwrap();

        let rows = conn
            .query("SELECT id, name, score FROM t WHERE id >= ?1 ORDER BY id", &[json!(1)])
            .await
            .unwrap();
        assert_eq!(rows.columns, vec!["id", "name", "score"]);
        assert_eq!(rows.rows[0], vec![json!(1), json!("one"), json!(0.5)]);
        assert_eq!(rows.rows[1][1], Value::Null);
    }

    #[tokio::test]
    async fn test_errors_carry_sqlite_codes() {
        let mut conn = SqliteConnection::open(":memory:".to_string()).await.unwrap();
        let err = conn
            .query("SELECT * FROM nope.sqlite_master", &[])
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("SQLITE_ERROR"));
        assert!(err.message().contains("unknown database"));
    }

    #[tokio::test]
    async fn test_missing_file_fails_to_open() {
        let result = SqliteConnection::open("/nonexistent/dir/x.db".to_string()).await;
        match result {
            Err(DriverError::Connect { code, .. }) => {
                assert_eq!(code.as_deref(), Some("SQLITE_CANTOPEN"))
            }
            _ => panic!("expected a connect error"),
        }
    }

    #[tokio::test]
    async fn test_closed_connection_is_unusable() {
        let conn = SqliteConnection::open(":memory:".to_string()).await.unwrap();
        let shared = conn.conn.clone();
        Box::new(conn).close().await.unwrap();
        assert!(shared.lock().unwrap().is_none());
    }
}
