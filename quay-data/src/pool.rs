//! A single named connection pool.
//!
//! Capacity accounting: a semaphore permit is held for the whole life of an
//! acquired connection, and idle connections are only created or re-issued
//! under a permit, so `|InUse| + |Idle| ≤ max_size` holds at every quiescent
//! point. Release converts in-use back to idle (or destroys broken
//! connections) before the permit frees the next waiter.
//!
//! Every checked-out connection's IO lives in a [`Lease`] slot the pool
//! keeps a handle to. Whoever takes the IO out of its slot settles the
//! accounting for it: normally that is the releasing caller, but once the
//! shutdown grace period elapses the pool revokes the remaining leases
//! itself and force-closes them, leaving the caller's handle inert. After
//! `shutdown()` returns there is nothing idle and nothing in use.

use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use quay_core::config::DatabasePoolSettings;

use crate::driver::{Connector, PooledIo};
use crate::error::PoolError;

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
    /// A connection is probed on acquire at most once per this interval.
    pub health_check_interval: Duration,
}

impl PoolConfig {
    pub fn from_settings(settings: &DatabasePoolSettings) -> Self {
        let max_size = settings.max_size.max(1);
        Self {
            min_size: settings.min_size.min(max_size),
            max_size,
            idle_timeout: Duration::from_secs(settings.idle_timeout_seconds),
            acquire_timeout: Duration::from_secs(settings.acquire_timeout_seconds),
            health_check_interval: Duration::from_secs(settings.health_check_interval_seconds),
        }
    }
}

struct IdleConn {
    io: Box<dyn PooledIo>,
    last_used: Instant,
    last_probe: Instant,
}

/// Shared slot holding a checked-out connection's IO. `None` means the
/// lease was revoked (forced shutdown) and the holder's handle is inert.
struct Lease {
    id: u64,
    io: Mutex<Option<Box<dyn PooledIo>>>,
}

struct PoolInner {
    name: String,
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConn>>,
    /// Leases currently checked out, reachable for forced revocation.
    outstanding: std::sync::Mutex<HashMap<u64, Arc<Lease>>>,
    next_lease_id: AtomicU64,
    in_use: AtomicUsize,
    closed: AtomicBool,
    drained: Notify,
}

impl PoolInner {
    fn settle_one(&self) {
        if self.in_use.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_one();
        }
    }

    /// Settle a lease coming back from a caller. A lease already revoked by
    /// a forced shutdown is inert; its accounting was settled there.
    async fn release_lease(&self, lease: Arc<Lease>, broken: bool, last_probe: Instant) {
        let io = lease.io.lock().await.take();
        let Some(io) = io else { return };
        self.outstanding
            .lock()
            .expect("pool lease registry poisoned")
            .remove(&lease.id);
        if broken || self.closed.load(Ordering::SeqCst) {
            io.close().await;
        } else {
            self.idle.lock().await.push_back(IdleConn {
                io,
                last_used: Instant::now(),
                last_probe,
            });
        }
        self.settle_one();
    }
}

/// Cloneable handle to one pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub fn new(name: impl Into<String>, connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        let max = config.max_size;
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                connector,
                config,
                semaphore: Arc::new(Semaphore::new(max)),
                idle: Mutex::new(VecDeque::new()),
                outstanding: std::sync::Mutex::new(HashMap::new()),
                next_lease_id: AtomicU64::new(0),
                in_use: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                drained: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn in_use_count(&self) -> usize {
        self.inner.in_use.load(Ordering::SeqCst)
    }

    pub async fn idle_count(&self) -> usize {
        self.inner.idle.lock().await.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Take a connection, blocking up to the configured acquire timeout.
    ///
    /// The returned connection has passed a liveness probe no older than the
    /// health-check interval. A stale or unhealthy idle connection is
    /// destroyed and the next candidate tried; a fresh connect is retried
    /// once before surfacing the driver error.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }
        let permit = match tokio::time::timeout(
            inner.config.acquire_timeout,
            inner.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Err(_) => return Err(PoolError::AcquireTimeout),
            Ok(Err(_)) => return Err(PoolError::Closed),
            Ok(Ok(permit)) => permit,
        };
        if inner.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        loop {
            let candidate = inner.idle.lock().await.pop_front();
            let Some(mut idle) = candidate else { break };
            if idle.last_probe.elapsed() >= inner.config.health_check_interval {
                match idle.io.ping().await {
                    Ok(()) => idle.last_probe = Instant::now(),
                    Err(err) => {
                        warn!(pool = %inner.name, error = %err, "idle connection failed probe, destroying");
                        idle.io.close().await;
                        continue;
                    }
                }
            }
            return Ok(self.issue(idle.io, idle.last_probe, permit));
        }

        let io = match inner.connector.connect().await {
            Ok(io) => io,
            Err(err) => {
                debug!(pool = %inner.name, error = %err, "connect failed, retrying once");
                inner
                    .connector
                    .connect()
                    .await
                    .map_err(|e| PoolError::Driver(e.to_string()))?
            }
        };
        Ok(self.issue(io, Instant::now(), permit))
    }

    fn issue(
        &self,
        io: Box<dyn PooledIo>,
        last_probe: Instant,
        permit: OwnedSemaphorePermit,
    ) -> PooledConnection {
        let inner = &self.inner;
        let lease = Arc::new(Lease {
            id: inner.next_lease_id.fetch_add(1, Ordering::SeqCst),
            io: Mutex::new(Some(io)),
        });
        inner
            .outstanding
            .lock()
            .expect("pool lease registry poisoned")
            .insert(lease.id, lease.clone());
        inner.in_use.fetch_add(1, Ordering::SeqCst);
        PooledConnection {
            lease,
            last_probe,
            broken: false,
            permit: Some(permit),
            pool: Arc::downgrade(inner),
        }
    }

    /// Return a connection to its pool. Broken connections are destroyed
    /// instead of pooled.
    pub async fn release(&self, mut conn: PooledConnection) {
        let Some(permit) = conn.permit.take() else { return };
        if let Some(inner) = conn.pool.upgrade() {
            inner
                .release_lease(conn.lease.clone(), conn.broken, conn.last_probe)
                .await;
        } else if let Some(io) = conn.lease.io.lock().await.take() {
            io.close().await;
        }
        drop(permit);
    }

    /// Evict idle connections past the idle timeout (keeping the pool at
    /// least at `min_size`), then reconnect up to `min_size` if the driver
    /// cooperates.
    pub async fn maintain(&self) {
        let inner = &self.inner;
        let mut to_close = Vec::new();
        {
            let mut idle = inner.idle.lock().await;
            let mut kept = VecDeque::new();
            while let Some(conn) = idle.pop_front() {
                let total = inner.in_use.load(Ordering::SeqCst) + idle.len() + kept.len() + 1;
                if conn.last_used.elapsed() > inner.config.idle_timeout
                    && total > inner.config.min_size
                {
                    to_close.push(conn.io);
                } else {
                    kept.push_back(conn);
                }
            }
            *idle = kept;
        }
        for io in to_close {
            io.close().await;
        }
        self.top_up().await;
    }

    /// Best-effort warm-up to `min_size` idle connections.
    pub async fn warm_up(&self) {
        self.top_up().await;
    }

    async fn top_up(&self) {
        let inner = &self.inner;
        loop {
            if inner.closed.load(Ordering::SeqCst) {
                return;
            }
            {
                let idle = inner.idle.lock().await;
                if inner.in_use.load(Ordering::SeqCst) + idle.len() >= inner.config.min_size {
                    return;
                }
            }
            match inner.connector.connect().await {
                Ok(io) => {
                    if inner.closed.load(Ordering::SeqCst) {
                        io.close().await;
                        return;
                    }
                    inner.idle.lock().await.push_back(IdleConn {
                        io,
                        last_used: Instant::now(),
                        last_probe: Instant::now(),
                    });
                }
                Err(err) => {
                    debug!(pool = %inner.name, error = %err, "warm-up connect failed");
                    return;
                }
            }
        }
    }

    /// Close the pool: reject new acquires, wait up to `grace` for in-flight
    /// connections to come back, then forcibly revoke and destroy whatever
    /// is still out, along with everything idle. When this returns the pool
    /// holds no connections, idle or in use. Idempotent.
    pub async fn shutdown(&self, grace: Duration) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.semaphore.close();

        let deadline = Instant::now() + grace;
        while inner.in_use.load(Ordering::SeqCst) > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let _ = tokio::time::timeout(remaining, inner.drained.notified()).await;
        }

        // Revoke whatever the grace period did not flush: take the IO away
        // from its holder and destroy it. The holder's handle turns inert
        // and its eventual release settles as a no-op.
        let leases: Vec<Arc<Lease>> = {
            let mut outstanding = inner
                .outstanding
                .lock()
                .expect("pool lease registry poisoned");
            outstanding.drain().map(|(_, lease)| lease).collect()
        };
        let mut forced = 0usize;
        for lease in leases {
            if let Some(io) = lease.io.lock().await.take() {
                io.close().await;
                inner.settle_one();
                forced += 1;
            }
        }
        if forced > 0 {
            warn!(
                pool = %inner.name,
                forced,
                "grace period elapsed, forcibly closed in-flight connections"
            );
        }

        let mut idle = inner.idle.lock().await;
        while let Some(conn) = idle.pop_front() {
            conn.io.close().await;
        }
        info!(pool = %inner.name, "pool shut down");
    }

    /// Run periodic maintenance until the token is cancelled.
    pub fn spawn_maintenance(
        &self,
        interval: Duration,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => pool.maintain().await,
                }
            }
        })
    }
}

/// An acquired connection. Prefer returning it via [`Pool::release`];
/// dropping it without release still returns it (or destroys it if broken)
/// on a background task. A forced pool shutdown revokes the underlying IO,
/// after which the handle reports [`PoolError::Closed`].
pub struct PooledConnection {
    lease: Arc<Lease>,
    last_probe: Instant,
    broken: bool,
    permit: Option<OwnedSemaphorePermit>,
    pool: std::sync::Weak<PoolInner>,
}

impl PooledConnection {
    /// Quarantine this connection: on release it is destroyed, never pooled.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Probe the connection now; a failure marks it broken.
    pub async fn ping(&mut self) -> Result<(), PoolError> {
        let mut slot = self.lease.io.lock().await;
        let Some(io) = slot.as_deref_mut() else {
            return Err(PoolError::Closed);
        };
        match io.ping().await {
            Ok(()) => {
                self.last_probe = Instant::now();
                Ok(())
            }
            Err(err) => {
                self.broken = true;
                Err(err)
            }
        }
    }

    /// Exclusive access to the driver IO, e.g. to downcast to the concrete
    /// client. Fails if the pool revoked the lease during shutdown.
    pub async fn io_mut(&mut self) -> Result<IoGuard<'_>, PoolError> {
        let guard = self.lease.io.lock().await;
        if guard.is_none() {
            return Err(PoolError::Closed);
        }
        Ok(IoGuard { guard })
    }
}

/// Guard over a leased connection's IO. The lease cannot be revoked while
/// the guard is held.
pub struct IoGuard<'a> {
    guard: tokio::sync::MutexGuard<'a, Option<Box<dyn PooledIo>>>,
}

impl Deref for IoGuard<'_> {
    type Target = dyn PooledIo;

    fn deref(&self) -> &Self::Target {
        self.guard.as_deref().expect("lease revoked while guarded")
    }
}

impl DerefMut for IoGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard
            .as_deref_mut()
            .expect("lease revoked while guarded")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else { return };
        let Some(inner) = self.pool.upgrade() else { return };
        let lease = self.lease.clone();
        let broken = self.broken;
        let last_probe = self.last_probe;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                inner.release_lease(lease, broken, last_probe).await;
                drop(permit);
            });
        }
    }
}
