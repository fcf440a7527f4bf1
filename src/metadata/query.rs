//! Schema query requests.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::pattern::NamePattern;
use super::types::TableKind;
use crate::config::DataSourceId;

/// Fields shared by every request against a data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSourceContext {
    pub data_source_id: DataSourceId,
}

impl DataSourceContext {
    pub fn new(data_source_id: impl Into<DataSourceId>) -> Self {
        Self {
            data_source_id: data_source_id.into(),
        }
    }
}

/// Object families a query can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Table,
    View,
    Index,
}

impl std::str::FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "table" | "tables" => Ok(ObjectType::Table),
            "view" | "views" => Ok(ObjectType::View),
            "index" | "indexes" | "indices" => Ok(ObjectType::Index),
            other => Err(format!("unknown object type: {}", other)),
        }
    }
}

/// A metadata request against one data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaQuery {
    pub context: DataSourceContext,
    /// Exact catalog name; every catalog when absent.
    pub catalog_name: Option<String>,
    pub schema_name_pattern: Option<NamePattern>,
    pub object_types: Option<BTreeSet<ObjectType>>,
    pub table_name_pattern: Option<NamePattern>,
}

impl SchemaQuery {
    pub fn new(data_source_id: impl Into<DataSourceId>) -> Self {
        Self {
            context: DataSourceContext::new(data_source_id),
            catalog_name: None,
            schema_name_pattern: None,
            object_types: None,
            table_name_pattern: None,
        }
    }

    pub fn catalog(mut self, name: impl Into<String>) -> Self {
        self.catalog_name = Some(name.into());
        self
    }

    pub fn schema_pattern(mut self, pattern: impl Into<NamePattern>) -> Self {
        self.schema_name_pattern = Some(pattern.into());
        self
    }

    pub fn table_pattern(mut self, pattern: impl Into<NamePattern>) -> Self {
        self.table_name_pattern = Some(pattern.into());
        self
    }

    pub fn object_types(mut self, types: impl IntoIterator<Item = ObjectType>) -> Self {
        self.object_types = Some(types.into_iter().collect());
        self
    }

    pub fn data_source_id(&self) -> &DataSourceId {
        &self.context.data_source_id
    }

    /// Whether a relation of `kind` belongs in the result.
    ///
    /// A filter naming only [`ObjectType::Index`] keeps base tables, since
    /// they own the indexes.
    pub fn includes_kind(&self, kind: TableKind) -> bool {
        let Some(types) = &self.object_types else {
            return true;
        };
        let wants_tables = types.contains(&ObjectType::Table)
            || !(types.contains(&ObjectType::View) || types.contains(&ObjectType::Table));
        match kind {
            TableKind::Table | TableKind::SystemTable => wants_tables,
            TableKind::View | TableKind::MaterializedView => types.contains(&ObjectType::View),
        }
    }

    /// Whether indexes should be fetched.
    pub fn includes_indexes(&self) -> bool {
        self.object_types
            .as_ref()
            .map(|types| types.contains(&ObjectType::Index))
            .unwrap_or(true)
    }
}
