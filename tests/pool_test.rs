//! Connection pool behavior with an in-memory connector.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{postgres, FakeConnector};
use schemascope::config::{DataSourceCatalog, DataSourceDescriptor, DataSourceProvider};
use schemascope::pool::{ConnectionPool, PoolConfig};
use schemascope::IntrospectError;

fn pool(config: PoolConfig) -> (Arc<ConnectionPool>, Arc<common::Counters>) {
    let connector = FakeConnector::default();
    let counters = connector.counters.clone();
    (Arc::new(ConnectionPool::new(Arc::new(connector), config)), counters)
}

fn sized(max_size: u32) -> PoolConfig {
    PoolConfig {
        max_size,
        ..PoolConfig::default()
    }
}

fn pg() -> Arc<DataSourceDescriptor> {
    Arc::new(postgres("pg"))
}

#[tokio::test]
async fn test_released_connection_is_reused() {
    let (pool, counters) = pool(sized(2));
    let ds = pg();

    let conn = pool.acquire(&ds, Duration::from_secs(1)).await.unwrap();
    assert!(!conn.is_reused());
    pool.release(conn).await;

    let conn = pool.acquire(&ds, Duration::from_secs(1)).await.unwrap();
    assert!(conn.is_reused());
    assert_eq!(conn.data_source().as_str(), "pg");
    assert_eq!(counters.connects(), 1);

    let stats = pool.stats(&ds.id).unwrap();
    assert_eq!(stats.open, 1);
    assert_eq!(stats.in_use, 1);
    assert_eq!(stats.idle, 0);
}

#[tokio::test]
async fn test_acquire_fresh_bypasses_idle_set() {
    let (pool, counters) = pool(sized(2));
    let ds = pg();

    let conn = pool.acquire(&ds, Duration::from_secs(1)).await.unwrap();
    pool.release(conn).await;

    let fresh = pool.acquire_fresh(&ds, Duration::from_secs(1)).await.unwrap();
    assert!(!fresh.is_reused());
    assert_eq!(counters.connects(), 2);
    assert_eq!(pool.stats(&ds.id).unwrap().idle, 1);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_gets_released_connection() {
    let (pool, counters) = pool(sized(1));
    let ds = pg();

    let held = pool.acquire(&ds, Duration::from_secs(1)).await.unwrap();
    let releaser = {
        let pool = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            pool.release(held).await;
        })
    };

    let conn = pool.acquire(&ds, Duration::from_secs(1)).await.unwrap();
    assert!(conn.is_reused());
    assert_eq!(counters.connects(), 1);
    releaser.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_acquire_times_out_when_exhausted() {
    let (pool, _) = pool(sized(1));
    let ds = pg();

    let _held = pool.acquire(&ds, Duration::from_secs(1)).await.unwrap();
    let err = pool
        .acquire(&ds, Duration::from_millis(200))
        .await
        .unwrap_err();
    match err {
        IntrospectError::PoolExhausted { waited, .. } => {
            assert_eq!(waited, Duration::from_millis(200))
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_pools_are_independent_per_data_source() {
    let (pool, counters) = pool(sized(1));
    let a = pg();
    let b = Arc::new(postgres("pg-replica"));

    let _a = pool.acquire(&a, Duration::ZERO).await.unwrap();
    let _b = pool.acquire(&b, Duration::ZERO).await.unwrap();
    assert_eq!(counters.connects(), 2);

    let ids: Vec<_> = pool.data_sources().iter().map(|d| d.to_string()).collect();
    assert_eq!(ids, vec!["pg", "pg-replica"]);
}

#[tokio::test]
async fn test_dropped_connection_is_closed() {
    let (pool, counters) = pool(sized(1));
    let ds = pg();

    let conn = pool.acquire(&ds, Duration::from_secs(1)).await.unwrap();
    drop(conn);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(counters.closes(), 1);
    let stats = pool.stats(&ds.id).unwrap();
    assert_eq!(stats.open, 0);
    assert_eq!(stats.in_use, 0);

    // The slot is free again
    assert!(pool.acquire(&ds, Duration::ZERO).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_reap_closes_expired_idle_connections() {
    let config = PoolConfig {
        max_idle: Duration::from_secs(1),
        ..PoolConfig::default()
    };
    let (pool, counters) = pool(config);
    let ds = pg();

    let conn = pool.acquire(&ds, Duration::from_secs(1)).await.unwrap();
    pool.release(conn).await;
    assert_eq!(pool.reap().await, 0);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(pool.reap().await, 1);
    assert_eq!(counters.closes(), 1);
    assert_eq!(pool.stats(&ds.id).unwrap().open, 0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_idle_connection_is_not_lent() {
    let config = PoolConfig {
        max_idle: Duration::from_secs(1),
        ..PoolConfig::default()
    };
    let (pool, counters) = pool(config);
    let ds = pg();

    let conn = pool.acquire(&ds, Duration::from_secs(1)).await.unwrap();
    pool.release(conn).await;
    tokio::time::advance(Duration::from_secs(5)).await;

    let conn = pool.acquire(&ds, Duration::from_secs(1)).await.unwrap();
    assert!(!conn.is_reused());
    assert_eq!(counters.connects(), 2);
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn test_evict_closes_idle_and_later_returns() {
    let (pool, counters) = pool(sized(2));
    let ds = pg();

    let idle = pool.acquire(&ds, Duration::from_secs(1)).await.unwrap();
    let borrowed = pool.acquire(&ds, Duration::from_secs(1)).await.unwrap();
    pool.release(idle).await;

    assert_eq!(pool.evict(&ds.id).await, 1);
    assert!(pool.stats(&ds.id).is_none());
    assert_eq!(counters.closes(), 1);

    // A connection from the evicted pool is closed on return
    pool.release(borrowed).await;
    assert_eq!(counters.closes(), 2);
}

#[tokio::test]
async fn test_changed_descriptor_gets_a_new_pool() {
    let (pool, counters) = pool(sized(2));
    let ds = pg();

    let conn = pool.acquire(&ds, Duration::from_secs(1)).await.unwrap();
    pool.release(conn).await;

    let moved = Arc::new(postgres("pg").with_port(6543));
    let conn = pool.acquire(&moved, Duration::from_secs(1)).await.unwrap();
    assert!(!conn.is_reused());
    assert_eq!(counters.connects(), 2);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(counters.closes(), 1);
}

/// The stored descriptor of "pg" before and after an edit.
fn revisions() -> (Arc<DataSourceDescriptor>, Arc<DataSourceDescriptor>) {
    let catalog = DataSourceCatalog::new();
    catalog.upsert(postgres("pg"));
    let old = catalog.descriptor(&"pg".into()).unwrap();
    catalog.upsert(postgres("pg").with_port(6543));
    let new = catalog.descriptor(&"pg".into()).unwrap();
    (old, new)
}

#[tokio::test]
async fn test_older_revision_does_not_replace_newer_pool() {
    let (pool, counters) = pool(sized(1));
    let (old, new) = revisions();

    let held = pool.acquire(&new, Duration::ZERO).await.unwrap();

    let err = pool.acquire(&old, Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, IntrospectError::ConnectionUnavailable { .. }));
    let err = pool.acquire_fresh(&old, Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, IntrospectError::ConnectionUnavailable { .. }));

    // The newer pool is intact and still bounded
    let err = pool.acquire(&new, Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, IntrospectError::PoolExhausted { .. }));
    assert_eq!(counters.connects(), 1);
    assert_eq!(pool.stats(&new.id).unwrap().in_use, 1);

    pool.release(held).await;
    let conn = pool.acquire(&new, Duration::ZERO).await.unwrap();
    assert!(conn.is_reused());
}

#[tokio::test]
async fn test_superseded_revision_is_refused_after_evict() {
    let (pool, counters) = pool(sized(1));
    let (old, new) = revisions();

    let conn = pool.acquire(&old, Duration::ZERO).await.unwrap();
    pool.release(conn).await;
    pool.supersede(&old.id, new.revision());
    assert_eq!(pool.evict(&old.id).await, 1);

    let err = pool.acquire(&old, Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, IntrospectError::ConnectionUnavailable { .. }));
    assert!(pool.stats(&old.id).is_none());

    let conn = pool.acquire(&new, Duration::ZERO).await.unwrap();
    assert!(!conn.is_reused());
    assert_eq!(counters.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_then_refuses() {
    let (pool, counters) = pool(sized(2));
    let ds = pg();

    let idle = pool.acquire(&ds, Duration::from_secs(1)).await.unwrap();
    pool.release(idle).await;
    let held = pool.acquire(&ds, Duration::from_secs(1)).await.unwrap();

    let returner = {
        let pool = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            pool.release(held).await;
        })
    };

    pool.shutdown(Duration::from_secs(5)).await;
    returner.await.unwrap();

    // The returned connection is closed on release, the idle one at drain
    assert!(pool.is_closed());
    assert_eq!(counters.closes(), 2);
    let err = pool.acquire(&ds, Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, IntrospectError::PoolClosed { .. }));
}
