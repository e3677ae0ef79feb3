use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use super::cursor::MemoryCursor;
use super::store::MemoryStore;
use crate::driver::{
    Checkout, Connection, ConnectionPool, DriverError, FindRequest, NativeCursor, PoolKey,
    PoolToken, SharedConnection,
};
use crate::telemetry::ScanMetrics;

/// How the pool hands out connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    /// Track entries by key; release through the returned token.
    Keyed,
    /// Hand out bare handles; release through the handle.
    Bare,
}

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub(crate) connections_created: AtomicU64,
    pub(crate) acquired: AtomicU64,
    pub(crate) released_by_key: AtomicU64,
    pub(crate) released_by_handle: AtomicU64,
    pub(crate) protocol_violations: AtomicU64,
    pub(crate) finds: AtomicU64,
    pub(crate) batches_fetched: AtomicU64,
    pub(crate) cursors_killed: AtomicU64,
    pub(crate) cursors_leaked: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn snapshot(&self) -> PoolStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PoolStats {
            connections_created: load(&self.connections_created),
            acquired: load(&self.acquired),
            released_by_key: load(&self.released_by_key),
            released_by_handle: load(&self.released_by_handle),
            protocol_violations: load(&self.protocol_violations),
            finds: load(&self.finds),
            batches_fetched: load(&self.batches_fetched),
            cursors_killed: load(&self.cursors_killed),
            cursors_leaked: load(&self.cursors_leaked),
        }
    }
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub connections_created: u64,
    pub acquired: u64,
    pub released_by_key: u64,
    pub released_by_handle: u64,
    /// Releases through the wrong protocol, or of an entry not checked out.
    pub protocol_violations: u64,
    pub finds: u64,
    pub batches_fetched: u64,
    pub cursors_killed: u64,
    /// Cursors dropped without being killed.
    pub cursors_leaked: u64,
}

#[derive(Debug, Default)]
struct Faults {
    acquire: Option<DriverError>,
    find: Option<DriverError>,
    stream_after: Option<u64>,
}

/// A connection into the shared store. Records every find it serves.
pub struct MemoryConnection {
    store: Arc<MemoryStore>,
    faults: Arc<Mutex<Faults>>,
    requests: Arc<Mutex<Vec<FindRequest>>>,
    counters: Arc<PoolCounters>,
}

impl Connection for MemoryConnection {
    fn find(&self, request: FindRequest) -> Result<Box<dyn NativeCursor>, DriverError> {
        ScanMetrics::incr(&self.counters.finds, 1);
        self.requests.lock().push(request.clone());
        let (fault, fail_after) = {
            let mut f = self.faults.lock();
            (f.find.take(), f.stream_after.take())
        };
        if let Some(e) = fault {
            return Err(e);
        }
        let results = self.store.find(&request)?;
        Ok(Box::new(MemoryCursor::new(
            results,
            request.batch_size,
            fail_after,
            Arc::clone(&self.counters),
        )))
    }
}

struct Entry {
    token: PoolToken,
    connection: Arc<MemoryConnection>,
    in_use: usize,
    idle_until: Option<Instant>,
}

/// Thread-safe pool over a [`MemoryStore`], one entry per [`PoolKey`].
pub struct MemoryPool {
    store: Arc<MemoryStore>,
    mode: CheckoutMode,
    entries: Mutex<HashMap<PoolKey, Entry>>,
    faults: Arc<Mutex<Faults>>,
    requests: Arc<Mutex<Vec<FindRequest>>>,
    counters: Arc<PoolCounters>,
}

impl MemoryPool {
    #[must_use]
    pub fn new(store: Arc<MemoryStore>, mode: CheckoutMode) -> Self {
        Self {
            store,
            mode,
            entries: Mutex::new(HashMap::new()),
            faults: Arc::new(Mutex::new(Faults::default())),
            requests: Arc::new(Mutex::new(Vec::new())),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Fail the next `acquire` with `err`.
    pub fn fail_next_acquire(&self, err: DriverError) {
        self.faults.lock().acquire = Some(err);
    }

    /// Fail the next `find` on any connection with `err`.
    pub fn fail_next_find(&self, err: DriverError) {
        self.faults.lock().find = Some(err);
    }

    /// Make the next cursor fail after serving `n` documents.
    pub fn fail_stream_after(&self, n: u64) {
        self.faults.lock().stream_after = Some(n);
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Every find request served so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<FindRequest> {
        self.requests.lock().clone()
    }

    /// Connections currently checked out, across all entries.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.entries.lock().values().map(|e| e.in_use).sum()
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Drop idle entries whose idle deadline passed by `now`. Returns how many went.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.in_use > 0 || e.idle_until.is_none_or(|t| t > now));
        let evicted = before - entries.len();
        if evicted > 0 {
            log::debug!("evicted {evicted} idle pool entries");
        }
        evicted
    }

    fn check_in(entry: &mut Entry, idle_hint: Duration) -> bool {
        if entry.in_use == 0 {
            return false;
        }
        entry.in_use -= 1;
        if entry.in_use == 0 {
            entry.idle_until = Some(Instant::now() + idle_hint);
        }
        true
    }

    fn violation(&self, what: &str) {
        ScanMetrics::incr(&self.counters.protocol_violations, 1);
        log::warn!("pool protocol violation: {what}");
    }
}

impl ConnectionPool for MemoryPool {
    fn acquire(&self, key: &PoolKey) -> Result<Checkout, DriverError> {
        if let Some(e) = self.faults.lock().acquire.take() {
            return Err(e);
        }
        let mut entries = self.entries.lock();
        if !entries.contains_key(key) {
            self.store.authenticate(&key.credentials)?;
            let connection = Arc::new(MemoryConnection {
                store: Arc::clone(&self.store),
                faults: Arc::clone(&self.faults),
                requests: Arc::clone(&self.requests),
                counters: Arc::clone(&self.counters),
            });
            ScanMetrics::incr(&self.counters.connections_created, 1);
            entries.insert(
                key.clone(),
                Entry {
                    token: PoolToken(Uuid::new_v4().to_string()),
                    connection,
                    in_use: 0,
                    idle_until: None,
                },
            );
        }
        let Some(entry) = entries.get_mut(key) else {
            return Err(DriverError::Network("pool entry vanished".into()));
        };
        entry.in_use += 1;
        entry.idle_until = None;
        ScanMetrics::incr(&self.counters.acquired, 1);
        let connection: SharedConnection = entry.connection.clone();
        Ok(match self.mode {
            CheckoutMode::Keyed => Checkout::Keyed { token: entry.token.clone(), connection },
            CheckoutMode::Bare => Checkout::Bare(connection),
        })
    }

    fn release_key(&self, token: &PoolToken, idle_hint: Duration) {
        if self.mode != CheckoutMode::Keyed {
            self.violation("key release on a bare pool");
            return;
        }
        let released = self
            .entries
            .lock()
            .values_mut()
            .find(|e| &e.token == token)
            .is_some_and(|e| Self::check_in(e, idle_hint));
        if released {
            ScanMetrics::incr(&self.counters.released_by_key, 1);
        } else {
            self.violation(&format!("token {token} is not checked out"));
        }
    }

    fn release_connection(&self, connection: &SharedConnection, idle_hint: Duration) {
        if self.mode != CheckoutMode::Bare {
            self.violation("handle release on a keyed pool");
            return;
        }
        let target = Arc::as_ptr(connection).cast::<()>();
        let released = self
            .entries
            .lock()
            .values_mut()
            .find(|e| Arc::as_ptr(&e.connection).cast::<()>() == target)
            .is_some_and(|e| Self::check_in(e, idle_hint));
        if released {
            ScanMetrics::incr(&self.counters.released_by_handle, 1);
        } else {
            self.violation("released handle is not checked out");
        }
    }
}
