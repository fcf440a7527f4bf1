//! Deterministic ordering of assembled results.

use std::collections::HashSet;

use crate::metadata::{CanonicalSchemaInfo, TableInfo};

/// Sort every level by name (columns by ordinal) and drop repeated names.
///
/// Engines may report the same object twice (a union over catalog views, a
/// table visible through two grants); the first occurrence wins.
pub fn normalize(mut info: CanonicalSchemaInfo) -> CanonicalSchemaInfo {
    info.catalogs.sort_by(|a, b| a.name.cmp(&b.name));
    info.catalogs.dedup_by(|a, b| a.name == b.name);

    for catalog in &mut info.catalogs {
        catalog.schemas.sort_by(|a, b| a.name.cmp(&b.name));
        catalog.schemas.dedup_by(|a, b| a.name == b.name);

        for schema in &mut catalog.schemas {
            schema.tables.sort_by(|a, b| a.name.cmp(&b.name));
            schema.tables.dedup_by(|a, b| a.name == b.name);
            schema.tables.iter_mut().for_each(normalize_table);
        }
    }
    info
}

fn normalize_table(table: &mut TableInfo) {
    table
        .columns
        .sort_by(|a, b| a.ordinal_position.cmp(&b.ordinal_position).then_with(|| a.name.cmp(&b.name)));
    let mut seen = HashSet::new();
    table.columns.retain(|c| seen.insert(c.name.clone()));

    table.indexes.sort_by(|a, b| a.name.cmp(&b.name));
    table.indexes.dedup_by(|a, b| a.name == b.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Engine;
    use crate::metadata::{
        CatalogInfo, ColumnInfo, DataType, IdentifierCase, IndexInfo, SchemaInfo, TableKind,
    };

    fn column(name: &str, ordinal: u32) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            ordinal_position: ordinal,
            data_type: DataType::from_native("integer", None, None, None),
            nullable: true,
            default_value: None,
            is_primary_key: false,
            comment: None,
        }
    }

    fn table(name: &str, columns: Vec<ColumnInfo>) -> TableInfo {
        TableInfo {
            name: name.to_string(),
            kind: TableKind::Table,
            comment: None,
            columns,
            indexes: vec![],
        }
    }

    #[test]
    fn test_sorts_and_dedups_every_level() {
        let info = CanonicalSchemaInfo {
            data_source: "ds".into(),
            engine: Engine::Postgres,
            identifier_case: IdentifierCase::Lower,
            catalogs: vec![
                CatalogInfo {
                    name: "b".to_string(),
                    schemas: vec![],
                },
                CatalogInfo {
                    name: "a".to_string(),
                    schemas: vec![SchemaInfo {
                        name: "public".to_string(),
                        tables: vec![
                            table("orders", vec![column("total", 3), column("id", 1), column("id", 1)]),
                            table("customers", vec![]),
                            table("orders", vec![]),
                        ],
                    }],
                },
            ],
        };

        let info = normalize(info);
        let names: Vec<_> = info.catalogs.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let tables = &info.catalogs[0].schemas[0].tables;
        let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["customers", "orders"]);

        let cols: Vec<_> = tables[1].columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(cols, vec!["id", "total"]);
    }

    #[test]
    fn test_indexes_sorted() {
        let mut t = table("t", vec![]);
        t.indexes = ["z_idx", "a_idx", "a_idx"]
            .iter()
            .map(|n| IndexInfo {
                name: n.to_string(),
                columns: vec!["c".to_string()],
                is_unique: false,
                is_primary: false,
            })
            .collect();
        normalize_table(&mut t);
        let names: Vec<_> = t.indexes.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a_idx", "z_idx"]);
    }
}
