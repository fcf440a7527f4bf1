//! Protocol types for the driver worker.
//!
//! One JSON object per line in each direction. Requests carry a unique id
//! that the worker echoes back, so several requests can be in flight on the
//! same pipe.

use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Envelope
// ============================================================================

/// Request envelope sent to the worker.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation.
    pub id: String,
    /// Method name (e.g., "session.open").
    pub method: String,
    /// Method-specific parameters.
    pub params: serde_json::Value,
}

/// Response envelope received from the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to.
    pub id: String,
    /// Whether the request succeeded.
    pub success: bool,
    /// Result data (present if success = true).
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error information (present if success = false).
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

/// Error information in a failed response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    /// Worker error code (e.g. "QUERY_FAILED").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Engine-native error code (SQLSTATE, ORA-nnnnn, MySQL errno...).
    #[serde(default)]
    pub vendor_code: Option<String>,
}

// ============================================================================
// Session Parameters
// ============================================================================

/// Parameters for `session.open`.
#[derive(Debug, Clone, Serialize)]
pub struct OpenSessionParams {
    /// Database driver name (e.g., "postgres", "sqlserver").
    pub driver: String,
    /// Driver-specific connection string.
    pub connection_string: String,
}

/// Response from `session.open`.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenSessionResponse {
    pub session_id: String,
    /// Server version banner, when the driver reports one.
    #[serde(default)]
    pub server_version: Option<String>,
}

/// Parameters for `session.close` and `session.ping`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionParams {
    pub session_id: String,
}

/// Response from `session.close` and `session.ping`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AckResponse {
    #[serde(default)]
    pub ok: bool,
}

// ============================================================================
// Query Execution
// ============================================================================

/// Parameters for `query.execute`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteQueryParams {
    pub session_id: String,
    /// SQL text with engine-native placeholders.
    pub sql: String,
    /// Positional bind values.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<serde_json::Value>,
}

/// Column information in query results.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResultColumn {
    /// Column name or alias.
    pub name: String,
    /// Database-specific type.
    #[serde(default)]
    pub data_type: String,
}

/// Response from `query.execute`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteQueryResponse {
    /// Result column descriptions.
    pub columns: Vec<QueryResultColumn>,
    /// Result data rows.
    pub rows: Vec<Vec<serde_json::Value>>,
}

// ============================================================================
// Method Names
// ============================================================================

/// Worker method names.
pub mod methods {
    pub const OPEN_SESSION: &str = "session.open";
    pub const CLOSE_SESSION: &str = "session.close";
    pub const PING_SESSION: &str = "session.ping";
    pub const EXECUTE_QUERY: &str = "query.execute";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_params_skip_empty_args() {
        let params = ExecuteQueryParams {
            session_id: "s1".to_string(),
            sql: "SELECT 1".to_string(),
            args: vec![],
        };
        let json = serde_json::to_value(&params).unwrap();
        assert!(json.get("args").is_none());
        assert_eq!(json["session_id"], "s1");
    }

    #[test]
    fn test_error_info_vendor_code_optional() {
        let info: ErrorInfo =
            serde_json::from_str(r#"{"code": "QUERY_FAILED", "message": "boom"}"#).unwrap();
        assert!(info.vendor_code.is_none());

        let info: ErrorInfo = serde_json::from_str(
            r#"{"code": "QUERY_FAILED", "message": "denied", "vendor_code": "42501"}"#,
        )
        .unwrap();
        assert_eq!(info.vendor_code.as_deref(), Some("42501"));
    }

    #[test]
    fn test_execute_response_deserialization() {
        let json = r#"{
            "columns": [{"name": "schema_name", "data_type": "TEXT"}],
            "rows": [["public"], ["sales"]]
        }"#;
        let resp: ExecuteQueryResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.columns[0].name, "schema_name");
        assert_eq!(resp.rows.len(), 2);
    }
}
