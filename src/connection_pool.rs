//! Connection pool configuration and rotation.
//!
//! Each reqwest client owns its own connection pool, so a "pool handle" here is
//! a client plus bookkeeping. Requests take a [`PoolLease`] on the handle that
//! is current when they are dispatched. Rotation swaps a fresh handle in for
//! new dispatches and closes the old one in the background once its last
//! lease is released; in-flight requests are never cut off.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{build_client, ClientBuildError, ClientConfig};
use crate::metrics::POOL_ROTATIONS_TOTAL;

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum idle connections to keep per host
    pub max_idle_per_host: usize,

    /// How long idle connections stay in the pool before cleanup
    pub idle_timeout: Duration,

    /// TCP keepalive duration
    pub tcp_keepalive: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 32,
            idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Some(Duration::from_secs(60)),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_tcp_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.tcp_keepalive = keepalive;
        self
    }

    /// Apply this configuration to a reqwest ClientBuilder.
    pub fn apply_to_builder(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        let mut builder = builder
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_idle_timeout(self.idle_timeout);

        if let Some(keepalive) = self.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }

        builder
    }
}

struct HandleInner {
    generation: u64,
    // Taken when the pool closes; dropping the last clone closes its connections.
    client: Mutex<Option<reqwest::Client>>,
    active: watch::Sender<usize>,
    served: AtomicU64,
    closed: AtomicBool,
}

/// One connection pool generation. Cheap to clone.
#[derive(Clone)]
pub struct PoolHandle {
    inner: Arc<HandleInner>,
}

impl PoolHandle {
    fn new(generation: u64, client: reqwest::Client) -> Self {
        let (active, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(HandleInner {
                generation,
                client: Mutex::new(Some(client)),
                active,
                served: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn client_slot(&self) -> MutexGuard<'_, Option<reqwest::Client>> {
        self.inner
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Generation number, starting at 0 for the first pool.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// Marks one request as using this pool until the lease is dropped.
    ///
    /// Returns None once the pool has been closed.
    pub fn lease(&self) -> Option<PoolLease> {
        let client = self.client_slot().as_ref()?.clone();
        self.inner.active.send_modify(|n| *n += 1);
        self.inner.served.fetch_add(1, Ordering::Relaxed);
        Some(PoolLease {
            handle: self.clone(),
            client,
        })
    }

    /// Requests currently holding a lease.
    pub fn active_requests(&self) -> usize {
        *self.inner.active.borrow()
    }

    /// Leases ever taken on this pool.
    pub fn requests_served(&self) -> u64 {
        self.inner.served.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Waits until no lease is outstanding, then releases the client.
    async fn drain(&self) {
        let mut active = self.inner.active.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = active.wait_for(|n| *n == 0).await;
        self.client_slot().take();
        self.inner.closed.store(true, Ordering::Release);
    }
}

/// A request's claim on the pool it was dispatched with.
pub struct PoolLease {
    handle: PoolHandle,
    client: reqwest::Client,
}

impl PoolLease {
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn generation(&self) -> u64 {
        self.handle.generation()
    }
}

impl Drop for PoolLease {
    fn drop(&mut self) {
        self.handle
            .inner
            .active
            .send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Owns the current pool and rotates it every `reset_every` dispatches.
pub struct PoolManager {
    client_config: ClientConfig,
    reset_every: Option<u64>,
    // None once `close_final` has run.
    current: Mutex<Option<PoolHandle>>,
    since_rotation: AtomicU64,
    next_generation: AtomicU64,
    rotations: AtomicU64,
    closing: Mutex<Vec<JoinHandle<()>>>,
}

impl PoolManager {
    /// Builds the first pool. `reset_every` of None or 0 disables rotation.
    pub fn new(
        client_config: ClientConfig,
        reset_every: Option<u64>,
    ) -> Result<Self, ClientBuildError> {
        let client = build_client(&client_config)?;
        Ok(Self {
            client_config,
            reset_every: reset_every.filter(|n| *n > 0),
            current: Mutex::new(Some(PoolHandle::new(0, client))),
            since_rotation: AtomicU64::new(0),
            next_generation: AtomicU64::new(1),
            rotations: AtomicU64::new(0),
            closing: Mutex::new(Vec::new()),
        })
    }

    fn current_slot(&self) -> MutexGuard<'_, Option<PoolHandle>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The pool new requests should use, or None after [`close_final`](Self::close_final).
    pub fn current(&self) -> Option<PoolHandle> {
        self.current_slot().clone()
    }

    /// Leases the current pool for one request.
    pub fn lease(&self) -> Option<PoolLease> {
        self.current()?.lease()
    }

    /// Counts one dispatch and rotates once the threshold is reached.
    ///
    /// Returns true if a rotation happened. If a replacement client cannot be
    /// built the current pool stays in service. A closed manager never rotates.
    pub fn rotate_if_due(&self) -> bool {
        let Some(reset_every) = self.reset_every else {
            return false;
        };

        let dispatched = self.since_rotation.fetch_add(1, Ordering::AcqRel) + 1;
        if dispatched < reset_every {
            return false;
        }
        self.since_rotation.store(0, Ordering::Release);

        let client = match build_client(&self.client_config) {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Failed to build replacement connection pool, keeping current pool");
                return false;
            }
        };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let old = {
            let mut slot = self.current_slot();
            match slot.as_mut() {
                Some(current) => std::mem::replace(current, PoolHandle::new(generation, client)),
                None => return false,
            }
        };

        self.rotations.fetch_add(1, Ordering::Relaxed);
        POOL_ROTATIONS_TOTAL.inc();
        info!(
            old_generation = old.generation(),
            new_generation = generation,
            requests_served = old.requests_served(),
            "Rotated connection pool"
        );

        self.drain_and_close(old);
        true
    }

    /// Closes `handle` in the background once its in-flight requests finish.
    pub fn drain_and_close(&self, handle: PoolHandle) {
        let task = tokio::spawn(async move {
            handle.drain().await;
            debug!(
                generation = handle.generation(),
                requests_served = handle.requests_served(),
                "Connection pool closed"
            );
        });
        self.closing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    /// Number of rotations performed so far.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Takes the current pool out of service, waits for its in-flight requests
    /// and every background close, then releases it. Later calls are no-ops
    /// apart from awaiting any remaining background closes.
    pub async fn close_final(&self) {
        let current = self.current_slot().take();
        if let Some(ref handle) = current {
            handle.drain().await;
        }

        let pending: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.closing.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in pending {
            if let Err(e) = task.await {
                warn!(error = %e, "Background pool close task failed");
            }
        }

        if let Some(handle) = current {
            info!(
                generation = handle.generation(),
                rotations = self.rotations(),
                "Final connection pool closed"
            );
        }
    }
}
