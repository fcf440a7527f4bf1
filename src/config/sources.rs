//! Lookup of data source descriptors by id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::datasource::{ConfigError, DataSourceDescriptor, DataSourceId};
use super::settings::Settings;

/// Supplies descriptors to the introspection core.
///
/// The core only reads descriptors; whoever owns them reports edits through
/// [`IntrospectionEngine::data_source_changed`](crate::engine::IntrospectionEngine::data_source_changed).
pub trait DataSourceProvider: Send + Sync {
    fn descriptor(&self, id: &DataSourceId) -> Option<Arc<DataSourceDescriptor>>;
}

/// In-process descriptor store, usually loaded from [`Settings`].
#[derive(Debug, Default)]
pub struct DataSourceCatalog {
    sources: DashMap<DataSourceId, Arc<DataSourceDescriptor>>,
    revisions: AtomicU64,
}

impl DataSourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let catalog = Self::new();
        for descriptor in settings.descriptors()? {
            catalog.upsert(descriptor);
        }
        Ok(catalog)
    }

    /// Insert or replace a descriptor. Returns `true` if an existing,
    /// different descriptor was replaced.
    ///
    /// Every stored change gets a new, higher revision. An identical
    /// descriptor keeps the stored one.
    pub fn upsert(&self, mut descriptor: DataSourceDescriptor) -> bool {
        match self.sources.entry(descriptor.id.clone()) {
            Entry::Occupied(mut existing) => {
                if **existing.get() == descriptor {
                    return false;
                }
                descriptor.revision = self.next_revision();
                existing.insert(Arc::new(descriptor));
                true
            }
            Entry::Vacant(slot) => {
                descriptor.revision = self.next_revision();
                slot.insert(Arc::new(descriptor));
                false
            }
        }
    }

    fn next_revision(&self) -> u64 {
        self.revisions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn remove(&self, id: &DataSourceId) -> Option<Arc<DataSourceDescriptor>> {
        self.sources.remove(id).map(|(_, d)| d)
    }

    /// Sorted list of known ids.
    pub fn ids(&self) -> Vec<DataSourceId> {
        let mut ids: Vec<_> = self.sources.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl DataSourceProvider for DataSourceCatalog {
    fn descriptor(&self, id: &DataSourceId) -> Option<Arc<DataSourceDescriptor>> {
        self.sources.get(id).map(|d| d.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Engine;

    #[test]
    fn test_upsert_reports_changes() {
        let catalog = DataSourceCatalog::new();
        let ds = DataSourceDescriptor::sqlite("local", "a.db");

        assert!(!catalog.upsert(ds.clone()));
        assert!(!catalog.upsert(ds.clone()), "identical descriptor is not a change");
        assert!(catalog.upsert(DataSourceDescriptor::sqlite("local", "b.db")));

        let current = catalog.descriptor(&"local".into()).unwrap();
        assert_eq!(current.database, "b.db");
    }

    #[test]
    fn test_changes_get_higher_revisions() {
        let catalog = DataSourceCatalog::new();
        catalog.upsert(DataSourceDescriptor::sqlite("local", "a.db"));
        let first = catalog.descriptor(&"local".into()).unwrap();

        catalog.upsert(DataSourceDescriptor::sqlite("local", "a.db"));
        assert!(Arc::ptr_eq(&first, &catalog.descriptor(&"local".into()).unwrap()));

        catalog.upsert(DataSourceDescriptor::sqlite("local", "b.db"));
        catalog.upsert(DataSourceDescriptor::sqlite("local", "a.db"));
        let reverted = catalog.descriptor(&"local".into()).unwrap();
        assert_eq!(*reverted, *first);
        assert!(reverted.revision() > first.revision());
        assert!(first.revision() > 0);
    }

    #[test]
    fn test_ids_sorted_and_remove() {
        let catalog = DataSourceCatalog::new();
        catalog.upsert(DataSourceDescriptor::network("zeta", Engine::MySql, "h", "d"));
        catalog.upsert(DataSourceDescriptor::sqlite("alpha", "a.db"));

        assert_eq!(catalog.ids(), vec!["alpha".into(), "zeta".into()]);
        assert!(catalog.remove(&"alpha".into()).is_some());
        assert!(catalog.descriptor(&"alpha".into()).is_none());
        assert_eq!(catalog.len(), 1);
    }
}
