//! Cache keys derived from schema queries.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::hash::hash_text;
use crate::config::DataSourceId;
use crate::metadata::SchemaQuery;

/// Identity of one cached result.
///
/// Object type and table filters are folded into a fingerprint so new
/// filter fields only change how it is computed, not the key shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub data_source: DataSourceId,
    pub catalog: Option<String>,
    pub schema_pattern: Option<String>,
    pub filter_fingerprint: String,
}

impl CacheKey {
    pub fn from_query(query: &SchemaQuery) -> Self {
        Self {
            data_source: query.data_source_id().clone(),
            catalog: query.catalog_name.clone(),
            schema_pattern: query.schema_name_pattern.as_ref().map(|p| p.to_string()),
            filter_fingerprint: filter_fingerprint(query),
        }
    }
}

/// Hash of the filter fields that are not part of the key proper.
///
/// An absent filter is tagged apart from any pattern a caller can type.
fn filter_fingerprint(query: &SchemaQuery) -> String {
    let types = match &query.object_types {
        Some(types) => format!(
            "some:{}",
            types
                .iter()
                .map(|t| format!("{:?}", t))
                .collect::<Vec<_>>()
                .join(",")
        ),
        None => "none".to_string(),
    };
    let table = match &query.table_name_pattern {
        Some(pattern) => format!("some:{}", pattern),
        None => "none".to_string(),
    };
    hash_text(&format!("types={};table={}", types, table))
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}#{}",
            self.data_source,
            self.catalog.as_deref().unwrap_or("*"),
            self.schema_pattern.as_deref().unwrap_or("*"),
            &self.filter_fingerprint[..self.filter_fingerprint.len().min(8)]
        )
    }
}
