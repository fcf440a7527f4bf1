//! Engine to adapter resolution.

use std::collections::HashMap;
use std::sync::Arc;

use super::{DriverAdapter, DuckDb, MySql, Oracle, Postgres, SqlServer, Sqlite};
use crate::config::Engine;

/// Fixed mapping from engine family to adapter.
///
/// Built once and immutable afterwards; lookups are side-effect free.
#[derive(Debug, Clone)]
pub struct DialectRegistry {
    adapters: HashMap<Engine, Arc<dyn DriverAdapter>>,
}

impl DialectRegistry {
    /// Registry with every built-in adapter.
    pub fn builtin() -> Self {
        Self::with_adapters([
            Arc::new(MySql) as Arc<dyn DriverAdapter>,
            Arc::new(Postgres),
            Arc::new(Oracle),
            Arc::new(SqlServer),
            Arc::new(Sqlite),
            Arc::new(DuckDb),
        ])
    }

    /// Registry with exactly the given adapters. A later adapter for the
    /// same engine replaces an earlier one.
    pub fn with_adapters(adapters: impl IntoIterator<Item = Arc<dyn DriverAdapter>>) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|adapter| (adapter.engine(), adapter))
            .collect();
        Self { adapters }
    }

    /// Adapter for `engine`, or `None` if the family is not served.
    pub fn resolve(&self, engine: Engine) -> Option<Arc<dyn DriverAdapter>> {
        self.adapters.get(&engine).cloned()
    }

    pub fn supports(&self, engine: Engine) -> bool {
        self.adapters.contains_key(&engine)
    }

    /// Registered engines, sorted.
    pub fn engines(&self) -> Vec<Engine> {
        let mut engines: Vec<_> = self.adapters.keys().copied().collect();
        engines.sort();
        engines
    }
}

impl Default for DialectRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
