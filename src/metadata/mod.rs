//! Canonical metadata model and query types.
//!
//! Requests enter as a [`SchemaQuery`] and leave as a
//! [`CanonicalSchemaInfo`]. Nothing in this module talks to a database;
//! adapters convert native catalog rows into these types.
//!
//! ```text
//! SchemaQuery { context, catalog_name, schema_name_pattern, object_types, table_name_pattern }
//!        │
//!        ▼
//! CanonicalSchemaInfo
//!   └── CatalogInfo
//!         └── SchemaInfo
//!               └── TableInfo ── ColumnInfo (DataType)
//!                             └─ IndexInfo
//! ```

mod pattern;
mod query;
mod types;

pub use pattern::{NamePattern, ESCAPE};
pub use query::{DataSourceContext, ObjectType, SchemaQuery};
pub use types::*;
