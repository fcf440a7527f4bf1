//! SQLite-backed persistent tier.
//!
//! Results survive process restarts in `~/.schemascope/cache.db`. Rows carry
//! an absolute expiry in Unix milliseconds; expired rows are never served.
//!
//! ```text
//! schema_cache(key TEXT PK, data_source TEXT, value TEXT, expires_at INTEGER)
//! meta(key TEXT PK, value TEXT)            -- 'version' -> STORE_VERSION
//! ```
//!
//! A version mismatch on open clears the table.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};

use super::hash::compute_hash;
use super::key::CacheKey;
use super::{CacheError, CacheResult};
use crate::config::DataSourceId;
use crate::metadata::CanonicalSchemaInfo;

/// Bump when the stored key or value format changes.
const STORE_VERSION: i32 = 2;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

pub struct PersistentStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore").finish_non_exhaustive()
    }
}

impl PersistentStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> CacheResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> CacheResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    /// `~/.schemascope/cache.db`
    pub fn default_path() -> CacheResult<PathBuf> {
        let base = dirs::home_dir().ok_or(CacheError::NoCacheDir)?;
        Ok(base.join(".schemascope").join("cache.db"))
    }

    fn init(conn: Connection) -> CacheResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_cache (
                key TEXT PRIMARY KEY,
                data_source TEXT NOT NULL,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS schema_cache_data_source
                ON schema_cache (data_source);

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;

        let stored_version: Option<i32> = conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        if stored_version != Some(STORE_VERSION) {
            if stored_version.is_some() {
                conn.execute("DELETE FROM schema_cache", [])?;
            }
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('version', ?1)",
                params![STORE_VERSION.to_string()],
            )?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CacheError::Poisoned)
    }

    fn row_key(key: &CacheKey) -> CacheResult<String> {
        Ok(compute_hash(key)?)
    }

    /// Stored value and its remaining lifetime, if present and unexpired.
    pub fn get(&self, key: &CacheKey) -> CacheResult<Option<(CanonicalSchemaInfo, Duration)>> {
        let row_key = Self::row_key(key)?;
        let conn = self.conn()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT value, expires_at FROM schema_cache WHERE key = ?1",
                params![row_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((json, expires_at)) = row else {
            return Ok(None);
        };
        let now = now_millis();
        if expires_at <= now {
            conn.execute("DELETE FROM schema_cache WHERE key = ?1", params![row_key])?;
            return Ok(None);
        }

        let value = serde_json::from_str(&json)?;
        Ok(Some((value, Duration::from_millis((expires_at - now) as u64))))
    }

    pub fn put(&self, key: &CacheKey, value: &CanonicalSchemaInfo, ttl: Duration) -> CacheResult<()> {
        let row_key = Self::row_key(key)?;
        let json = serde_json::to_string(value)?;
        let expires_at = now_millis().saturating_add(ttl.as_millis() as i64);
        self.conn()?.execute(
            "INSERT OR REPLACE INTO schema_cache (key, data_source, value, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![row_key, key.data_source.as_str(), json, expires_at],
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        let row_key = Self::row_key(key)?;
        let rows = self
            .conn()?
            .execute("DELETE FROM schema_cache WHERE key = ?1", params![row_key])?;
        Ok(rows > 0)
    }

    /// Remove every row of one data source.
    pub fn invalidate(&self, data_source: &DataSourceId) -> CacheResult<usize> {
        let rows = self.conn()?.execute(
            "DELETE FROM schema_cache WHERE data_source = ?1",
            params![data_source.as_str()],
        )?;
        Ok(rows)
    }

    pub fn clear(&self) -> CacheResult<usize> {
        Ok(self.conn()?.execute("DELETE FROM schema_cache", [])?)
    }

    pub fn purge_expired(&self) -> CacheResult<usize> {
        let rows = self.conn()?.execute(
            "DELETE FROM schema_cache WHERE expires_at <= ?1",
            params![now_millis()],
        )?;
        Ok(rows)
    }

    pub fn len(&self) -> CacheResult<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM schema_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Engine;
    use crate::metadata::{IdentifierCase, SchemaQuery};

    fn info(ds: &str) -> CanonicalSchemaInfo {
        CanonicalSchemaInfo {
            data_source: ds.into(),
            engine: Engine::Sqlite,
            identifier_case: IdentifierCase::Preserve,
            catalogs: vec![],
        }
    }

    fn key(ds: &str, catalog: &str) -> CacheKey {
        CacheKey::from_query(&SchemaQuery::new(ds).catalog(catalog))
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = PersistentStore::open_in_memory().unwrap();
        let k = key("local", "main");
        store.put(&k, &info("local"), Duration::from_secs(60)).unwrap();

        let (value, remaining) = store.get(&k).unwrap().unwrap();
        assert_eq!(value, info("local"));
        assert!(remaining <= Duration::from_secs(60));
        assert!(store.get(&key("local", "aux")).unwrap().is_none());
    }

    #[test]
    fn test_expired_rows_are_not_served() {
        let store = PersistentStore::open_in_memory().unwrap();
        let k = key("local", "main");
        store.put(&k, &info("local"), Duration::ZERO).unwrap();

        assert!(store.get(&k).unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_invalidate_only_touches_one_source() {
        let store = PersistentStore::open_in_memory().unwrap();
        let ttl = Duration::from_secs(60);
        store.put(&key("a", "x"), &info("a"), ttl).unwrap();
        store.put(&key("a", "y"), &info("a"), ttl).unwrap();
        store.put(&key("b", "x"), &info("b"), ttl).unwrap();

        assert_eq!(store.invalidate(&"a".into()).unwrap(), 2);
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.get(&key("b", "x")).unwrap().is_some());
    }

    #[test]
    fn test_purge_expired() {
        let store = PersistentStore::open_in_memory().unwrap();
        store.put(&key("a", "x"), &info("a"), Duration::ZERO).unwrap();
        store.put(&key("a", "y"), &info("a"), Duration::from_secs(60)).unwrap();

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.clear().unwrap(), 1);
    }
}
