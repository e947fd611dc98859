//! Bounded backend slot pool.
//!
//! The backend is frequently a single-session server, so the pool has to be
//! correct at capacity 1: a fair semaphore serializes loans FIFO, and at
//! most `capacity` connections exist at any moment. Slots are health-probed
//! before each loan (`pool_pre_ping`), replaced when they outlive
//! `pool_recycle`, and destroyed instead of returned after a
//! connectivity-shaped failure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use kestrel_common::config::BackendConfig;
use kestrel_common::error::BackendError;

use crate::connector::{BackendConnection, Connector, QueryOutput};

/// Pre-loan health probe. Chosen because `SHOW STATUS` bypasses downstream
/// policy gates on deployments that stack another proxy on top of this one.
pub const HEALTH_PROBE_SQL: &str = "SHOW STATUS LIKE 'Threads_connected'";

/// Pool tuning, lifted from the `backend.*` config section.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Capacity P. At most this many backend connections exist.
    pub capacity: usize,
    /// Health-probe a slot before lending it out.
    pub pre_ping: bool,
    /// Maximum slot age before proactive replacement (None = never).
    pub recycle: Option<Duration>,
}

impl PoolSettings {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            capacity: config.pool_size.max(1),
            pre_ping: config.pool_pre_ping,
            recycle: (config.pool_recycle > 0)
                .then(|| Duration::from_secs(config.pool_recycle)),
        }
    }
}

/// Observable pool statistics.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub total_checkouts: u64,
    pub total_returns: u64,
    pub total_waits: u64,
    pub total_timeouts: u64,
    pub slots_created: u64,
    pub slots_destroyed: u64,
    pub capacity: usize,
    pub idle: usize,
}

#[derive(Default)]
struct PoolStatsInner {
    total_checkouts: AtomicU64,
    total_returns: AtomicU64,
    total_waits: AtomicU64,
    total_timeouts: AtomicU64,
    slots_created: AtomicU64,
    slots_destroyed: AtomicU64,
}

/// An open backend connection owned by the pool.
struct Slot {
    id: u64,
    conn: Box<dyn BackendConnection>,
    created_at: Instant,
}

struct PoolInner {
    connector: Arc<dyn Connector>,
    settings: PoolSettings,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<Slot>>,
    stats: PoolStatsInner,
    next_slot_id: AtomicU64,
}

/// Bounded backend connection pool.
#[derive(Clone)]
pub struct BackendPool {
    inner: Arc<PoolInner>,
}

impl BackendPool {
    pub fn new(connector: Arc<dyn Connector>, settings: PoolSettings) -> Self {
        let capacity = settings.capacity;
        Self {
            inner: Arc::new(PoolInner {
                connector,
                settings,
                semaphore: Arc::new(Semaphore::new(capacity)),
                idle: Mutex::new(VecDeque::with_capacity(capacity)),
                stats: PoolStatsInner::default(),
                next_slot_id: AtomicU64::new(1),
            }),
        }
    }

    /// Borrow a slot, waiting FIFO until one is free. `timeout` bounds the
    /// wait; expiry returns `PoolExhausted` without touching any slot.
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<PooledSlot, BackendError> {
        let started = Instant::now();
        let inner = &self.inner;

        let permit = match inner.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                inner.stats.total_waits.fetch_add(1, Ordering::Relaxed);
                self.wait_for_permit(timeout, started).await?
            }
        };

        inner.stats.total_checkouts.fetch_add(1, Ordering::Relaxed);
        let slot = self.take_or_create_slot().await?;

        Ok(PooledSlot {
            inner: inner.clone(),
            slot: Some(slot),
            _permit: permit,
            defunct: false,
        })
    }

    async fn wait_for_permit(
        &self,
        timeout: Option<Duration>,
        started: Instant,
    ) -> Result<OwnedSemaphorePermit, BackendError> {
        let acquire = self.inner.semaphore.clone().acquire_owned();
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, acquire).await {
                Ok(result) => result,
                Err(_) => {
                    self.inner.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
                    return Err(BackendError::PoolExhausted {
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
            },
            None => acquire.await,
        };
        result.map_err(|_| BackendError::Fatal("backend pool is closed".into()))
    }

    /// Pull an idle slot, recycling and probing as configured, or open a
    /// fresh connection. Caller already holds a permit, so the capacity
    /// bound cannot be exceeded here.
    async fn take_or_create_slot(&self) -> Result<Slot, BackendError> {
        let inner = &self.inner;

        loop {
            let popped = inner.idle.lock().pop_front();
            let Some(mut slot) = popped else { break };
            if let Some(max_age) = inner.settings.recycle {
                if slot.created_at.elapsed() > max_age {
                    tracing::debug!(slot_id = slot.id, "recycling aged backend slot");
                    self.destroy(slot).await;
                    continue;
                }
            }

            if inner.settings.pre_ping {
                match slot.conn.execute(HEALTH_PROBE_SQL).await {
                    Ok(_) => return Ok(slot),
                    Err(e) => {
                        tracing::warn!(slot_id = slot.id, "backend slot failed pre-ping: {}", e);
                        self.destroy(slot).await;
                        continue;
                    }
                }
            }
            return Ok(slot);
        }

        let conn = inner.connector.connect().await?;
        let id = inner.next_slot_id.fetch_add(1, Ordering::Relaxed);
        inner.stats.slots_created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(slot_id = id, "opened backend slot");
        Ok(Slot {
            id,
            conn,
            created_at: Instant::now(),
        })
    }

    async fn destroy(&self, slot: Slot) {
        self.inner.stats.slots_destroyed.fetch_add(1, Ordering::Relaxed);
        slot.conn.close().await;
    }

    /// Close every idle slot. In-flight loans finish and are then dropped.
    pub async fn close(&self) {
        self.inner.semaphore.close();
        let drained: Vec<Slot> = self.inner.idle.lock().drain(..).collect();
        for slot in drained {
            self.destroy(slot).await;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let stats = &self.inner.stats;
        PoolStats {
            total_checkouts: stats.total_checkouts.load(Ordering::Relaxed),
            total_returns: stats.total_returns.load(Ordering::Relaxed),
            total_waits: stats.total_waits.load(Ordering::Relaxed),
            total_timeouts: stats.total_timeouts.load(Ordering::Relaxed),
            slots_created: stats.slots_created.load(Ordering::Relaxed),
            slots_destroyed: stats.slots_destroyed.load(Ordering::Relaxed),
            capacity: self.inner.settings.capacity,
            idle: self.inner.idle.lock().len(),
        }
    }
}

/// A borrowed slot. Returned to the pool on drop unless a failure marked it
/// defunct, in which case the connection is discarded and the next loan
/// opens a fresh one.
pub struct PooledSlot {
    inner: Arc<PoolInner>,
    slot: Option<Slot>,
    _permit: OwnedSemaphorePermit,
    defunct: bool,
}

impl PooledSlot {
    pub fn slot_id(&self) -> u64 {
        self.slot.as_ref().map(|s| s.id).unwrap_or(0)
    }

    /// Run one statement on the borrowed connection. Transient failures
    /// mark the slot defunct; query errors leave it reusable.
    pub async fn execute(&mut self, sql: &str) -> Result<QueryOutput, BackendError> {
        let Some(slot) = self.slot.as_mut() else {
            return Err(BackendError::Fatal("slot already released".into()));
        };
        match slot.conn.execute(sql).await {
            Ok(output) => Ok(output),
            Err(e) => {
                if matches!(e, BackendError::Transient(_) | BackendError::Fatal(_)) {
                    self.defunct = true;
                }
                Err(e)
            }
        }
    }

    /// Force destruction on return. Used when a timeout abandoned the
    /// in-flight call and the connection state is unknown.
    pub fn mark_defunct(&mut self) {
        self.defunct = true;
    }
}

impl Drop for PooledSlot {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            if self.defunct {
                self.inner.stats.slots_destroyed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(slot_id = slot.id, "dropping defunct backend slot");
                // The connection is dropped without a protocol goodbye; the
                // backend reaps it.
            } else {
                self.inner.stats.total_returns.fetch_add(1, Ordering::Relaxed);
                self.inner.idle.lock().push_back(slot);
            }
        }
    }
}
