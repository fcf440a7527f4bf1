//! Canonical, engine-agnostic metadata model.
//!
//! Everything an adapter returns is converted into these types before it
//! leaves the adapter boundary. Names are reported exactly as the engine's
//! catalog stores them; [`IdentifierCase`] records how the engine folds
//! unquoted identifiers so callers can quote them correctly.

use serde::{Deserialize, Serialize};

use crate::config::{DataSourceId, Engine};

/// How an engine folds unquoted identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierCase {
    /// Unquoted identifiers are stored upper-case (Oracle, DB2).
    Upper,
    /// Unquoted identifiers are stored lower-case (PostgreSQL).
    Lower,
    /// Identifiers are stored as written (MySQL, SQL Server, SQLite, DuckDB).
    Preserve,
}

impl IdentifierCase {
    /// Fold an unquoted identifier the way the engine would.
    pub fn fold(&self, ident: &str) -> String {
        match self {
            IdentifierCase::Upper => ident.to_uppercase(),
            IdentifierCase::Lower => ident.to_lowercase(),
            IdentifierCase::Preserve => ident.to_string(),
        }
    }
}

/// Normalized result of one schema query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSchemaInfo {
    pub data_source: DataSourceId,
    pub engine: Engine,
    pub identifier_case: IdentifierCase,
    pub catalogs: Vec<CatalogInfo>,
}

impl CanonicalSchemaInfo {
    pub fn catalog(&self, name: &str) -> Option<&CatalogInfo> {
        self.catalogs.iter().find(|c| c.name == name)
    }

    /// Total number of tables and views across all catalogs.
    pub fn table_count(&self) -> usize {
        self.catalogs
            .iter()
            .flat_map(|c| &c.schemas)
            .map(|s| s.tables.len())
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogInfo {
    pub name: String,
    pub schemas: Vec<SchemaInfo>,
}

impl CatalogInfo {
    pub fn schema(&self, name: &str) -> Option<&SchemaInfo> {
        self.schemas.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub name: String,
    pub tables: Vec<TableInfo>,
}

impl SchemaInfo {
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Kind of relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Table,
    View,
    MaterializedView,
    SystemTable,
}

impl TableKind {
    /// Map a catalog's `TABLE_TYPE`-style string.
    pub fn from_native(native: &str) -> Self {
        let upper = native.trim().to_uppercase();
        match upper.as_str() {
            "VIEW" | "V" => TableKind::View,
            "MATERIALIZED VIEW" | "MATERIALIZED_VIEW" | "MVIEW" | "M" => {
                TableKind::MaterializedView
            }
            "SYSTEM VIEW" | "SYSTEM TABLE" | "SYSTEM_TABLE" | "S" => TableKind::SystemTable,
            _ if upper.contains("VIEW") => TableKind::View,
            _ => TableKind::Table,
        }
    }
}

/// Lightweight relation entry as returned by `list_tables`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub name: String,
    pub kind: TableKind,
    pub comment: Option<String>,
}

/// A relation with its columns and indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub kind: TableKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// 1-based position within the table.
    pub ordinal_position: u32,
    pub data_type: DataType,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub is_primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    /// Key columns in index order.
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
}

/// Engine-agnostic type family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Boolean,
    Integer,
    Decimal,
    Float,
    Text,
    Binary,
    Date,
    Time,
    Timestamp,
    Json,
    Uuid,
    Other,
}

/// Column type: canonical family plus the engine's own spelling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataType {
    pub kind: TypeKind,
    /// The type name as the engine reports it, lower-cased.
    pub native: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
}

impl DataType {
    /// Build a canonical type from the engine's type name.
    ///
    /// Size modifiers inside the name (`varchar(20)`, `numeric(10,2)`) are
    /// parsed when the explicit arguments are absent.
    pub fn from_native(
        native: &str,
        length: Option<u32>,
        precision: Option<u32>,
        scale: Option<u32>,
    ) -> Self {
        let native = native.trim().to_lowercase();
        let (base, args) = split_type_args(&native);

        let (mut length, mut precision, mut scale) = (length, precision, scale);
        match (base.as_str(), args.as_slice()) {
            (_, []) => {}
            (b, [n]) if is_character(b) || is_binary(b) => length = length.or(Some(*n)),
            (_, [p]) => precision = precision.or(Some(*p)),
            (_, [p, s, ..]) => {
                precision = precision.or(Some(*p));
                scale = scale.or(Some(*s));
            }
        }

        let kind = classify(&base, scale);
        Self {
            kind,
            native,
            length,
            precision,
            scale,
        }
    }
}

fn split_type_args(native: &str) -> (String, Vec<u32>) {
    match native.find('(') {
        Some(open) => {
            let close = native[open..].find(')').map(|i| open + i).unwrap_or(native.len());
            let args = native[open + 1..close]
                .split(',')
                .filter_map(|a| a.trim().parse().ok())
                .collect();
            let mut base = native[..open].trim().to_string();
            // Keep trailing qualifiers such as "unsigned" or "with time zone"
            let rest = native.get(close + 1..).unwrap_or("").trim();
            if !rest.is_empty() {
                base = format!("{} {}", base, rest);
            }
            (base, args)
        }
        None => (native.to_string(), Vec::new()),
    }
}

fn is_character(base: &str) -> bool {
    base.contains("char") || base.contains("text") || base == "string" || base.contains("clob")
}

fn is_binary(base: &str) -> bool {
    base.contains("binary") || base.contains("blob") || base == "bytea" || base == "raw"
}

fn classify(base: &str, scale: Option<u32>) -> TypeKind {
    let head = base.split_whitespace().next().unwrap_or("");
    match head {
        "bool" | "boolean" | "bit" => TypeKind::Boolean,
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "int2" | "int4"
        | "int8" | "serial" | "bigserial" | "smallserial" | "hugeint" | "utinyint"
        | "usmallint" | "uinteger" | "ubigint" | "pls_integer" | "binary_integer" => {
            TypeKind::Integer
        }
        // Oracle NUMBER with no fractional digits is an integer
        "number" if scale == Some(0) => TypeKind::Integer,
        "decimal" | "numeric" | "number" | "money" | "smallmoney" | "dec" => TypeKind::Decimal,
        "real" | "float" | "float4" | "float8" | "double" | "binary_float" | "binary_double" => {
            TypeKind::Float
        }
        "date" => TypeKind::Date,
        "time" | "timetz" => TypeKind::Time,
        "timestamp" | "timestamptz" | "datetime" | "datetime2" | "smalldatetime"
        | "datetimeoffset" => TypeKind::Timestamp,
        "json" | "jsonb" => TypeKind::Json,
        "uuid" | "uniqueidentifier" => TypeKind::Uuid,
        _ if is_binary(head) || head == "varbinary" || head == "image" => TypeKind::Binary,
        _ if is_character(head)
            || matches!(head, "nvarchar2" | "varchar2" | "enum" | "set" | "xml" | "citext") =>
        {
            TypeKind::Text
        }
        _ => TypeKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_kinds() {
        let cases = [
            ("INTEGER", TypeKind::Integer),
            ("bigint unsigned", TypeKind::Integer),
            ("varchar(255)", TypeKind::Text),
            ("nvarchar2", TypeKind::Text),
            ("numeric(10,2)", TypeKind::Decimal),
            ("double precision", TypeKind::Float),
            ("timestamp with time zone", TypeKind::Timestamp),
            ("datetime2", TypeKind::Timestamp),
            ("bytea", TypeKind::Binary),
            ("jsonb", TypeKind::Json),
            ("uniqueidentifier", TypeKind::Uuid),
            ("geometry", TypeKind::Other),
            ("", TypeKind::Other),
        ];

        for (native, expected) in cases {
            assert_eq!(
                DataType::from_native(native, None, None, None).kind,
                expected,
                "type {native}"
            );
        }
    }

    #[test]
    fn test_type_modifiers_are_parsed() {
        let t = DataType::from_native("VARCHAR(40)", None, None, None);
        assert_eq!(t.native, "varchar(40)");
        assert_eq!(t.length, Some(40));

        let t = DataType::from_native("numeric(12, 4)", None, None, None);
        assert_eq!((t.precision, t.scale), (Some(12), Some(4)));

        // Explicit catalog values win over the parsed ones
        let t = DataType::from_native("decimal(10,2)", None, Some(18), Some(6));
        assert_eq!((t.precision, t.scale), (Some(18), Some(6)));
    }

    #[test]
    fn test_oracle_number_scale() {
        assert_eq!(
            DataType::from_native("NUMBER", None, Some(10), Some(0)).kind,
            TypeKind::Integer
        );
        assert_eq!(
            DataType::from_native("NUMBER", None, Some(10), Some(2)).kind,
            TypeKind::Decimal
        );
    }

    #[test]
    fn test_table_kind_from_native() {
        assert_eq!(TableKind::from_native("BASE TABLE"), TableKind::Table);
        assert_eq!(TableKind::from_native("view"), TableKind::View);
        assert_eq!(TableKind::from_native("SYSTEM VIEW"), TableKind::SystemTable);
        assert_eq!(
            TableKind::from_native("MATERIALIZED VIEW"),
            TableKind::MaterializedView
        );
        assert_eq!(TableKind::from_native("LOCAL TEMPORARY"), TableKind::Table);
    }

    #[test]
    fn test_identifier_fold() {
        assert_eq!(IdentifierCase::Upper.fold("orders"), "ORDERS");
        assert_eq!(IdentifierCase::Lower.fold("Orders"), "orders");
        assert_eq!(IdentifierCase::Preserve.fold("Orders"), "Orders");
    }
}
