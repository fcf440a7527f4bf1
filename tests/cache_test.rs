//! Single-flight and persistence behavior of the metadata cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use schemascope::cache::{CacheKey, Lookup, MetadataCache, PersistentStore};
use schemascope::config::{CacheSettings, Engine};
use schemascope::metadata::{CanonicalSchemaInfo, CatalogInfo, IdentifierCase, SchemaQuery};
use schemascope::{FailureKind, IntrospectError, Operation};

fn info(ds: &str, catalog: &str) -> CanonicalSchemaInfo {
    CanonicalSchemaInfo {
        data_source: ds.into(),
        engine: Engine::Postgres,
        identifier_case: IdentifierCase::Lower,
        catalogs: vec![CatalogInfo {
            name: catalog.to_string(),
            schemas: vec![],
        }],
    }
}

fn key(ds: &str) -> CacheKey {
    CacheKey::from_query(&SchemaQuery::new(ds))
}

fn temp_db() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("schemascope-{}.db", uuid::Uuid::new_v4()))
}

/// Fetches through `cache`, counting how often the fetch actually runs.
async fn fetch_counted(
    cache: &Arc<MetadataCache>,
    calls: &Arc<AtomicUsize>,
    catalog: &'static str,
) -> Result<(Arc<CanonicalSchemaInfo>, Lookup), IntrospectError> {
    let calls = calls.clone();
    cache
        .lookup_or_fetch(key("pg"), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(info("pg", catalog)))
        })
        .await
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_share_one_fetch() {
    let cache = Arc::new(MetadataCache::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let waiters = (0..16).map(|_| {
        let cache = cache.clone();
        let calls = calls.clone();
        tokio::spawn(async move {
            cache
                .get_or_fetch(key("pg"), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(Arc::new(info("pg", "app")))
                })
                .await
        })
    });
    let results = futures::future::join_all(waiters).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap().unwrap().catalogs[0].name, "app");
    }
    assert_eq!(cache.stats().entries, 1);
    assert_eq!(cache.stats().in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_waiter_does_not_cancel_fetch() {
    let cache = Arc::new(MetadataCache::default());

    let waiter = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_or_fetch(key("pg"), || async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(Arc::new(info("pg", "app")))
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    waiter.abort();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(cache.get(&key("pg")).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_invalidation_discards_in_flight_result() {
    let cache = Arc::new(MetadataCache::default());

    let pending = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_or_fetch(key("pg"), || async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(Arc::new(info("pg", "before")))
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    cache.invalidate(&"pg".into());

    // The caller still gets its answer, but nothing is stored
    let value = pending.await.unwrap().unwrap();
    assert_eq!(value.catalogs[0].name, "before");
    assert!(cache.get(&key("pg")).is_none());

    // A new request starts its own fetch
    let value = cache
        .get_or_fetch(key("pg"), || async { Ok(Arc::new(info("pg", "after"))) })
        .await
        .unwrap();
    assert_eq!(value.catalogs[0].name, "after");
}

#[tokio::test]
async fn test_failed_fetch_reaches_every_waiter() {
    let cache = Arc::new(MetadataCache::default());
    let err = cache
        .get_or_fetch(key("pg"), || async {
            Err(IntrospectError::failure(
                "pg".into(),
                Operation::ListSchemas,
                FailureKind::PermissionDenied,
                Some("42501".to_string()),
                "permission denied for schema audit",
            ))
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(FailureKind::PermissionDenied));
    assert_eq!(cache.stats().entries, 0);
    assert_eq!(cache.stats().in_flight, 0);
}

#[tokio::test]
async fn test_persistent_tier_survives_restart() {
    let path = temp_db();

    {
        let store = PersistentStore::open(&path).unwrap();
        let cache = MetadataCache::with_store(Duration::from_secs(300), store);
        cache.put(key("pg"), Arc::new(info("pg", "app")));
        assert_eq!(cache.stats().persistent_entries, Some(1));
    }

    let store = PersistentStore::open(&path).unwrap();
    let cache = MetadataCache::with_store(Duration::from_secs(300), store);
    let value = cache.get(&key("pg")).unwrap();
    assert_eq!(value.catalogs[0].name, "app");
    assert_eq!(cache.stats().entries, 1);

    assert_eq!(cache.clear(), 1);
    assert_eq!(cache.stats().persistent_entries, Some(0));

    drop(cache);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_unreadable_persistent_row_is_a_miss() {
    let path = temp_db();
    {
        let cache = MetadataCache::with_store(Duration::from_secs(300), PersistentStore::open(&path).unwrap());
        cache.put(key("pg"), Arc::new(info("pg", "old")));
    }
    rusqlite::Connection::open(&path)
        .unwrap()
        .execute("UPDATE schema_cache SET value = '{not json'", [])
        .unwrap();

    let cache = Arc::new(MetadataCache::with_store(
        Duration::from_secs(300),
        PersistentStore::open(&path).unwrap(),
    ));
    let calls = Arc::new(AtomicUsize::new(0));
    let (value, lookup) = fetch_counted(&cache, &calls, "fresh").await.unwrap();
    assert_eq!(lookup, Lookup::Fetched);
    assert_eq!(value.catalogs[0].name, "fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The fresh result replaced the unreadable row
    let reopened = MetadataCache::with_store(Duration::from_secs(300), PersistentStore::open(&path).unwrap());
    assert_eq!(reopened.get(&key("pg")).unwrap().catalogs[0].name, "fresh");

    drop(cache);
    drop(reopened);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_failing_persistent_writes_keep_memory_tier() {
    let path = temp_db();
    let cache = Arc::new(MetadataCache::with_store(
        Duration::from_secs(300),
        PersistentStore::open(&path).unwrap(),
    ));
    rusqlite::Connection::open(&path)
        .unwrap()
        .execute_batch("DROP TABLE schema_cache")
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let (_, lookup) = fetch_counted(&cache, &calls, "app").await.unwrap();
    assert_eq!(lookup, Lookup::Fetched);

    let (value, lookup) = fetch_counted(&cache, &calls, "app").await.unwrap();
    assert_eq!(lookup, Lookup::Hit);
    assert_eq!(value.catalogs[0].name, "app");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().persistent_entries, None);

    drop(cache);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_unopenable_store_falls_back_to_memory() {
    // A regular file where the store's directory should be
    let blocker = temp_db();
    std::fs::write(&blocker, b"").unwrap();
    let settings = CacheSettings {
        persistent: true,
        path: Some(blocker.join("cache.db").to_string_lossy().into_owned()),
        ..CacheSettings::default()
    };

    let cache = Arc::new(MetadataCache::from_settings(&settings).unwrap());
    assert_eq!(cache.stats().persistent_entries, None);

    let calls = Arc::new(AtomicUsize::new(0));
    fetch_counted(&cache, &calls, "app").await.unwrap();
    let (_, lookup) = fetch_counted(&cache, &calls, "app").await.unwrap();
    assert_eq!(lookup, Lookup::Hit);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let _ = std::fs::remove_file(&blocker);
}
