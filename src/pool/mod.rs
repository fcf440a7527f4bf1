//! Connection pooling keyed by data source.
//!
//! Each data source gets its own bounded pool: a semaphore caps the number
//! of connections lent out at once and a stack of idle connections is
//! reused most-recently-idle first.
//!
//! ```text
//! acquire ── permit (wait ≤ timeout) ── idle? ── ping ok ──► PooledConnection
//!                                        │         └ fail ─► close, next idle
//!                                        └ none ─► connect
//! release ──► idle stack          invalidate / drop ──► close
//! ```

mod pooled;

pub use pooled::PooledConnection;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{parse_duration, DataSourceDescriptor, DataSourceId, PoolSettings, SettingsError};
use crate::connection::{Connector, DriverConnection};
use crate::error::{IntrospectError, IntrospectResult, Operation};

/// Upper bound for the liveness check of an idle connection.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool sizing and housekeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections per data source.
    pub max_size: u32,
    pub acquire_timeout: Duration,
    /// Idle connections older than this are closed by the reaper.
    pub max_idle: Duration,
    pub reap_interval: Duration,
    pub test_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            acquire_timeout: Duration::from_secs(5),
            max_idle: Duration::from_secs(600),
            reap_interval: Duration::from_secs(30),
            test_on_borrow: true,
        }
    }
}

impl PoolConfig {
    pub fn from_settings(settings: &PoolSettings) -> Result<Self, SettingsError> {
        if settings.max_size == 0 {
            return Err(SettingsError::InvalidConfig(
                "pool.max_size must be at least 1".to_string(),
            ));
        }
        let reap_interval = parse_duration(&settings.reap_interval)?;
        if reap_interval.is_zero() {
            return Err(SettingsError::InvalidConfig(
                "pool.reap_interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            max_size: settings.max_size,
            acquire_timeout: parse_duration(&settings.acquire_timeout)?,
            max_idle: parse_duration(&settings.max_idle)?,
            reap_interval,
            test_on_borrow: settings.test_on_borrow,
        })
    }
}

/// Occupancy of one data source's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub open: usize,
    pub idle: usize,
    pub in_use: usize,
    pub max_size: usize,
}

struct IdleConnection {
    conn: Box<dyn DriverConnection>,
    idle_since: Instant,
}

/// Pool of one data source.
pub(crate) struct SourcePool {
    descriptor: Arc<DataSourceDescriptor>,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConnection>>,
    open: AtomicUsize,
    retired: AtomicBool,
    max_size: usize,
}

impl SourcePool {
    fn new(descriptor: Arc<DataSourceDescriptor>, max_size: u32) -> Self {
        let max_size = max_size as usize;
        Self {
            descriptor,
            semaphore: Arc::new(Semaphore::new(max_size)),
            idle: Mutex::new(Vec::with_capacity(max_size)),
            open: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
            max_size,
        }
    }

    fn idle(&self) -> MutexGuard<'_, Vec<IdleConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Stop lending. Waiters on the semaphore are woken with an error.
    fn retire(&self) -> Vec<Box<dyn DriverConnection>> {
        self.retired.store(true, Ordering::Release);
        self.semaphore.close();
        let drained: Vec<_> = self.idle().drain(..).map(|i| i.conn).collect();
        self.open.fetch_sub(drained.len(), Ordering::AcqRel);
        drained
    }

    /// Account for a connection that leaves the pool.
    pub(crate) fn forget(&self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
    }

    async fn discard(&self, conn: Box<dyn DriverConnection>) {
        self.forget();
        close_logged(&self.descriptor.id, conn).await;
    }

    /// Close from a synchronous context (drop). Needs a runtime to run the
    /// close; without one the connection is simply dropped.
    pub(crate) fn discard_detached(&self, conn: Box<dyn DriverConnection>) {
        self.forget();
        let data_source = self.descriptor.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { close_logged(&data_source, conn).await });
            }
            Err(_) => drop(conn),
        }
    }

    fn stats(&self) -> PoolStats {
        let idle = self.idle().len();
        PoolStats {
            open: self.open.load(Ordering::Acquire),
            idle,
            in_use: self.max_size.saturating_sub(self.semaphore.available_permits()),
            max_size: self.max_size,
        }
    }
}

async fn close_logged(data_source: &DataSourceId, conn: Box<dyn DriverConnection>) {
    if let Err(e) = conn.close().await {
        warn!(data_source = %data_source, error = %e, "failed to close connection");
    }
}

/// Bounded, per-data-source connection pools.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    sources: DashMap<DataSourceId, Arc<SourcePool>>,
    /// Descriptors below this revision are refused.
    floors: DashMap<DataSourceId, u64>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("sources", &self.sources.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        Self {
            connector,
            config,
            sources: DashMap::new(),
            floors: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn closed_error(data_source: &DataSourceId) -> IntrospectError {
        IntrospectError::PoolClosed {
            data_source: data_source.clone(),
            operation: Operation::AcquireConnection,
        }
    }

    fn superseded_error(descriptor: &DataSourceDescriptor, current: u64) -> IntrospectError {
        IntrospectError::ConnectionUnavailable {
            data_source: descriptor.id.clone(),
            operation: Operation::AcquireConnection,
            message: format!(
                "descriptor revision {} was superseded by revision {}",
                descriptor.revision(),
                current
            ),
        }
    }

    /// Refuse descriptors of `data_source` older than `revision`.
    pub fn supersede(&self, data_source: &DataSourceId, revision: u64) {
        let mut floor = self.floors.entry(data_source.clone()).or_insert(0);
        *floor = (*floor).max(revision);
    }

    /// Pool for `descriptor`, replacing one built from an older descriptor.
    ///
    /// A descriptor with a lower revision than the pool's, or than the
    /// floor set by [`supersede`](Self::supersede), never replaces it.
    fn source_for(&self, descriptor: &Arc<DataSourceDescriptor>) -> IntrospectResult<Arc<SourcePool>> {
        let floor = self.floors.get(&descriptor.id).map(|f| *f).unwrap_or(0);
        let matches_current = self
            .sources
            .get(&descriptor.id)
            .is_some_and(|s| s.descriptor == *descriptor && !s.is_retired());
        if descriptor.revision() < floor && !matches_current {
            return Err(Self::superseded_error(descriptor, floor));
        }

        let mut stale = None;
        let source = {
            let mut entry = self
                .sources
                .entry(descriptor.id.clone())
                .or_insert_with(|| {
                    debug!(data_source = %descriptor.id, max_size = self.config.max_size, "creating connection pool");
                    Arc::new(SourcePool::new(descriptor.clone(), self.config.max_size))
                });
            if entry.descriptor != *descriptor || entry.is_retired() {
                let current = entry.descriptor.revision();
                if descriptor.revision() < current {
                    return Err(Self::superseded_error(descriptor, current));
                }
                let fresh = Arc::new(SourcePool::new(descriptor.clone(), self.config.max_size));
                stale = Some(std::mem::replace(entry.value_mut(), fresh));
            }
            entry.value().clone()
        };

        if let Some(old) = stale {
            debug!(data_source = %descriptor.id, "descriptor changed, retiring connection pool");
            for conn in old.retire() {
                close_detached(&descriptor.id, conn);
            }
        }
        Ok(source)
    }

    /// Borrow a connection, waiting up to `timeout` for a free slot.
    ///
    /// A zero `timeout` never waits.
    pub async fn acquire(
        &self,
        descriptor: &Arc<DataSourceDescriptor>,
        timeout: Duration,
    ) -> IntrospectResult<PooledConnection> {
        self.checkout(descriptor, timeout, true).await
    }

    /// Like [`acquire`](Self::acquire) but always opens a new connection,
    /// bypassing the idle set.
    pub async fn acquire_fresh(
        &self,
        descriptor: &Arc<DataSourceDescriptor>,
        timeout: Duration,
    ) -> IntrospectResult<PooledConnection> {
        self.checkout(descriptor, timeout, false).await
    }

    async fn checkout(
        &self,
        descriptor: &Arc<DataSourceDescriptor>,
        timeout: Duration,
        reuse_idle: bool,
    ) -> IntrospectResult<PooledConnection> {
        let data_source = &descriptor.id;
        let deadline = Instant::now() + timeout;

        loop {
            if self.is_closed() {
                return Err(Self::closed_error(data_source));
            }
            let source = self.source_for(descriptor)?;

            let permit = if timeout.is_zero() {
                match source.semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(TryAcquireError::NoPermits) => {
                        return Err(IntrospectError::PoolExhausted {
                            data_source: data_source.clone(),
                            operation: Operation::AcquireConnection,
                            waited: Duration::ZERO,
                        })
                    }
                    // Retired under us; look the pool up again
                    Err(TryAcquireError::Closed) => continue,
                }
            } else {
                let acquired =
                    tokio::time::timeout_at(deadline, source.semaphore.clone().acquire_owned()).await;
                match acquired {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => continue,
                    Err(_) => {
                        return Err(IntrospectError::PoolExhausted {
                            data_source: data_source.clone(),
                            operation: Operation::AcquireConnection,
                            waited: timeout,
                        })
                    }
                }
            };

            if source.is_retired() {
                continue;
            }

            let idle = if reuse_idle {
                self.take_idle(&source).await
            } else {
                None
            };
            if let Some(conn) = idle {
                return Ok(PooledConnection {
                    conn: Some(conn),
                    source,
                    reused: true,
                    _permit: permit,
                });
            }

            let conn = self.connector.connect(descriptor).await.map_err(|e| {
                IntrospectError::ConnectionUnavailable {
                    data_source: data_source.clone(),
                    operation: Operation::AcquireConnection,
                    message: e.to_string(),
                }
            })?;
            source.open.fetch_add(1, Ordering::AcqRel);
            debug!(data_source = %data_source, "opened connection");

            return Ok(PooledConnection {
                conn: Some(conn),
                source,
                reused: false,
                _permit: permit,
            });
        }
    }

    /// Most recently idle connection that is still usable.
    async fn take_idle(&self, source: &SourcePool) -> Option<Box<dyn DriverConnection>> {
        loop {
            let candidate = source.idle().pop()?;
            let mut conn = candidate.conn;

            if candidate.idle_since.elapsed() >= self.config.max_idle {
                debug!(data_source = %source.descriptor.id, "idle connection expired");
                source.discard(conn).await;
                continue;
            }
            if !self.config.test_on_borrow {
                return Some(conn);
            }
            match tokio::time::timeout(PING_TIMEOUT, conn.ping()).await {
                Ok(Ok(())) => return Some(conn),
                Ok(Err(e)) => {
                    debug!(data_source = %source.descriptor.id, error = %e, "idle connection failed ping");
                }
                Err(_) => {
                    debug!(data_source = %source.descriptor.id, "idle connection ping timed out");
                }
            }
            source.discard(conn).await;
        }
    }

    /// Return a healthy connection to its idle set.
    pub async fn release(&self, mut conn: PooledConnection) {
        let Some(inner) = conn.conn.take() else {
            return;
        };
        let source = conn.source.clone();
        if source.is_retired() || self.is_closed() {
            source.discard(inner).await;
            return;
        }
        source.idle().push(IdleConnection {
            conn: inner,
            idle_since: Instant::now(),
        });
        // `conn` drops here, after the push, so its permit frees a slot
        // only once the connection is visible to the next borrower.
        drop(conn);
    }

    /// Close a broken connection instead of reusing it.
    pub async fn invalidate(&self, mut conn: PooledConnection) {
        if let Some(inner) = conn.conn.take() {
            debug!(data_source = %conn.data_source(), "invalidating connection");
            conn.source.discard(inner).await;
        }
    }

    /// Retire a data source's pool. Idle connections are closed now,
    /// borrowed ones when they come back. Returns the number closed now.
    pub async fn evict(&self, data_source: &DataSourceId) -> usize {
        let Some((_, source)) = self.sources.remove(data_source) else {
            return 0;
        };
        let drained = source.retire();
        let closed = drained.len();
        for conn in drained {
            close_logged(data_source, conn).await;
        }
        info!(data_source = %data_source, closed, "evicted connection pool");
        closed
    }

    /// Close idle connections older than `max_idle`.
    pub async fn reap(&self) -> usize {
        let sources: Vec<Arc<SourcePool>> = self.sources.iter().map(|e| e.value().clone()).collect();
        let mut reaped = 0;
        for source in sources {
            let expired: Vec<Box<dyn DriverConnection>> = {
                let mut idle = source.idle();
                let (old, keep): (Vec<_>, Vec<_>) = idle
                    .drain(..)
                    .partition(|i| i.idle_since.elapsed() >= self.config.max_idle);
                *idle = keep;
                old.into_iter().map(|i| i.conn).collect()
            };
            for conn in expired {
                source.discard(conn).await;
                reaped += 1;
            }
        }
        if reaped > 0 {
            debug!(reaped, "reaped idle connections");
        }
        reaped
    }

    /// Run [`reap`](Self::reap) every `reap_interval` until the pool closes.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::downgrade(self);
        let period = self.config.reap_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else { break };
                if pool.is_closed() {
                    break;
                }
                pool.reap().await;
            }
        })
    }

    /// Refuse new acquisitions, wait up to `drain` for borrowed connections
    /// to come back, then close everything.
    pub async fn shutdown(&self, drain: Duration) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let deadline = Instant::now() + drain;
        let sources: Vec<(DataSourceId, Arc<SourcePool>)> = self
            .sources
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (data_source, source) in &sources {
            let all = source.max_size as u32;
            let drained =
                tokio::time::timeout_at(deadline, source.semaphore.clone().acquire_many_owned(all)).await;
            if !matches!(drained, Ok(Ok(_))) {
                let in_use = source.stats().in_use;
                warn!(data_source = %data_source, in_use, "connections still borrowed at shutdown");
            }
        }

        let mut closed = 0;
        for (data_source, source) in sources {
            for conn in source.retire() {
                close_logged(&data_source, conn).await;
                closed += 1;
            }
        }
        self.sources.clear();
        info!(closed, "connection pool shut down");
    }

    pub fn stats(&self, data_source: &DataSourceId) -> Option<PoolStats> {
        self.sources.get(data_source).map(|s| s.stats())
    }

    /// Data sources with a live pool, sorted.
    pub fn data_sources(&self) -> Vec<DataSourceId> {
        let mut ids: Vec<_> = self.sources.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

fn close_detached(data_source: &DataSourceId, conn: Box<dyn DriverConnection>) {
    let data_source = data_source.clone();
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { close_logged(&data_source, conn).await });
        }
        Err(_) => drop(conn),
    }
}
