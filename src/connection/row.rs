//! Result rows as returned by drivers.

use serde_json::Value;

/// Column names plus row values, positionally aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|values| Row { values })
    }
}

/// Borrowed view of one row with lenient typed getters.
///
/// Drivers disagree on how they encode booleans and numbers (`"YES"`,
/// `1`, `"t"`, `"42"`), so the getters accept every common spelling.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    values: &'a [Value],
}

impl<'a> Row<'a> {
    pub fn get(&self, idx: usize) -> &'a Value {
        self.values.get(idx).unwrap_or(&Value::Null)
    }

    /// Text value; numbers are rendered, null and missing become `None`.
    pub fn opt_str(&self, idx: usize) -> Option<String> {
        match self.get(idx) {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        }
    }

    pub fn str(&self, idx: usize) -> String {
        self.opt_str(idx).unwrap_or_default()
    }

    /// Text value with empty strings treated as absent.
    pub fn non_empty(&self, idx: usize) -> Option<String> {
        self.opt_str(idx).filter(|s| !s.trim().is_empty())
    }

    pub fn opt_u32(&self, idx: usize) -> Option<u32> {
        match self.get(idx) {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .and_then(|v| u32::try_from(v).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn bool(&self, idx: usize) -> bool {
        match self.get(idx) {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_i64().map(|v| v != 0).unwrap_or(false),
            Value::String(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "yes" | "y" | "true" | "t" | "1"
            ),
            _ => false,
        }
    }
}
