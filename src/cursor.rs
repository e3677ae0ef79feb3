//! Pull-based reader over one partition.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bson::Document;

use crate::config::ReadConfig;
use crate::dev6;
use crate::driver::{DriverError, FindRequest, NativeCursor};
use crate::errors::ScanError;
use crate::lease::{Lease, LeaseManager};
use crate::partition::PartitionDescriptor;
use crate::telemetry::ScanMetrics;
use crate::utils::num::millis_to_u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Unopened,
    Open,
    Exhausted,
    Closed,
}

impl fmt::Display for CursorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unopened => "unopened",
            Self::Open => "open",
            Self::Exhausted => "exhausted",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Owns at most one native cursor and one lease, both for a single partition.
///
/// Resources are released on exhaustion, on `close()`, on a failed `open()` and
/// on drop. The native cursor always goes before the lease it was opened on.
pub struct PartitionedCursor {
    leases: Arc<LeaseManager>,
    config: Arc<ReadConfig>,
    state: CursorState,
    partition: String,
    lease: Option<Lease>,
    native: Option<Box<dyn NativeCursor>>,
    // One document (or the error in its place) pulled ahead by `has_next`.
    lookahead: Option<Result<Document, DriverError>>,
    documents_read: u64,
    opened_at: Option<Instant>,
}

impl PartitionedCursor {
    #[must_use]
    pub fn new(leases: Arc<LeaseManager>, config: Arc<ReadConfig>) -> Self {
        Self {
            leases,
            config,
            state: CursorState::Unopened,
            partition: String::new(),
            lease: None,
            native: None,
            lookahead: None,
            documents_read: 0,
            opened_at: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> CursorState {
        self.state
    }

    /// Id of the partition passed to `open`; empty before that.
    #[must_use]
    pub fn partition_id(&self) -> &str {
        &self.partition
    }

    #[must_use]
    pub const fn documents_read(&self) -> u64 {
        self.documents_read
    }

    /// Whether a lease or native cursor is still held.
    #[must_use]
    pub const fn holds_resources(&self) -> bool {
        self.lease.is_some() || self.native.is_some()
    }

    fn metrics(&self) -> &ScanMetrics {
        self.leases.metrics()
    }

    /// Acquire a lease and start a find bounded to the partition's key range.
    ///
    /// # Errors
    /// `InvalidState` if the cursor was already opened or closed. Any failure
    /// while acquiring or querying comes back as `Read` for the partition, after
    /// everything acquired so far has been released and the cursor closed.
    pub fn open(
        &mut self,
        partition: &PartitionDescriptor,
        query: Document,
        projection: Document,
    ) -> Result<(), ScanError> {
        if self.state != CursorState::Unopened {
            return Err(ScanError::InvalidState(format!(
                "open() on a {} cursor (partition {})",
                self.state, partition.id
            )));
        }
        self.partition.clone_from(&partition.id);
        match self.start(partition, query, projection) {
            Ok(()) => {
                self.state = CursorState::Open;
                self.opened_at = Some(Instant::now());
                ScanMetrics::incr(&self.metrics().cursors_opened, 1);
                log::info!(
                    "opened cursor on {}.{} for partition {} (bounded: {})",
                    self.config.database,
                    self.config.collection,
                    self.partition,
                    partition.is_bounded()
                );
                Ok(())
            }
            Err(e) => {
                ScanMetrics::incr(&self.metrics().open_failures, 1);
                log::warn!("open failed for partition {}: {e}", self.partition);
                self.close();
                Err(ScanError::read(&partition.id, e))
            }
        }
    }

    fn start(
        &mut self,
        partition: &PartitionDescriptor,
        query: Document,
        projection: Document,
    ) -> Result<(), ScanError> {
        let lease = self.leases.acquire(
            &partition.endpoints,
            &self.config.credentials,
            self.config.tls.as_ref(),
            &self.config.connection_options,
        )?;
        let connection = Arc::clone(lease.connection());
        // Held by the cursor before the find, so a failing find still releases it.
        self.lease = Some(lease);
        let request = FindRequest {
            database: self.config.database.clone(),
            collection: self.config.collection.clone(),
            filter: query,
            projection,
            min: partition.min_key.clone(),
            max: partition.max_key.clone(),
            batch_size: self.config.batch_size,
        };
        log::debug!("find on partition {}: {:?}", partition.id, request.filter);
        self.native = Some(connection.find(request)?);
        Ok(())
    }

    /// False before open and after close or exhaustion. A driver error while
    /// looking ahead is kept and returned by the next call to `next`.
    pub fn has_next(&mut self) -> bool {
        if self.state != CursorState::Open {
            return false;
        }
        if self.lookahead.is_some() {
            return true;
        }
        let pulled = match self.native.as_mut() {
            Some(native) => native.try_next(),
            None => Ok(None),
        };
        match pulled {
            Ok(Some(doc)) => {
                self.lookahead = Some(Ok(doc));
                true
            }
            Ok(None) => {
                log::debug!(
                    "partition {} exhausted after {} documents",
                    self.partition,
                    self.documents_read
                );
                self.release_resources();
                self.state = CursorState::Exhausted;
                false
            }
            Err(e) => {
                self.lookahead = Some(Err(e));
                true
            }
        }
    }

    /// # Errors
    /// `InvalidState` before `open`, after `close` or past the end. Driver
    /// failures come back as `Read` for the partition and close the cursor.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Document, ScanError> {
        match self.state {
            CursorState::Unopened => {
                return Err(ScanError::InvalidState("next() called before open()".into()));
            }
            CursorState::Closed => {
                return Err(ScanError::InvalidState(format!(
                    "next() called on closed cursor for partition {}",
                    self.partition
                )));
            }
            CursorState::Open | CursorState::Exhausted => {}
        }
        if !self.has_next() {
            return Err(ScanError::InvalidState(format!(
                "partition {} has no more documents",
                self.partition
            )));
        }
        match self.lookahead.take() {
            Some(Ok(doc)) => {
                self.documents_read += 1;
                ScanMetrics::incr(&self.metrics().documents_read, 1);
                Ok(doc)
            }
            Some(Err(e)) => {
                log::warn!("read failed on partition {}: {e}", self.partition);
                // A native cursor that failed is not resumed; the caller re-opens on a new lease.
                self.close();
                Err(ScanError::read(&self.partition, e))
            }
            None => Err(ScanError::InvalidState("lookahead lost".into())),
        }
    }

    /// Release the native cursor, then the lease. Safe from any state and
    /// any number of times.
    pub fn close(&mut self) {
        if self.state == CursorState::Closed {
            return;
        }
        self.release_resources();
        self.state = CursorState::Closed;
    }

    fn release_resources(&mut self) {
        self.lookahead = None;
        if let Some(mut native) = self.native.take() {
            native.close();
            ScanMetrics::incr(&self.metrics().cursors_closed, 1);
            let ms = self.opened_at.map_or(0, |t| millis_to_u64(t.elapsed().as_millis()));
            dev6!(
                "{}",
                serde_json::json!({
                    "bench": "scan",
                    "op": "partition",
                    "partition": self.partition,
                    "documents": self.documents_read,
                    "ms": ms,
                })
            );
            log::debug!("closed cursor for partition {}", self.partition);
        }
        if let Some(mut lease) = self.lease.take() {
            self.leases.release(&mut lease, self.config.lease_idle_hint());
        }
    }

    /// Iterate the remaining documents. Stops after the first error.
    pub fn documents(&mut self) -> Documents<'_> {
        Documents { cursor: self, failed: false }
    }
}

impl fmt::Debug for PartitionedCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionedCursor")
            .field("partition", &self.partition)
            .field("state", &self.state)
            .field("documents_read", &self.documents_read)
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

impl Drop for PartitionedCursor {
    fn drop(&mut self) {
        if self.holds_resources() {
            log::warn!("cursor for partition {} dropped without close()", self.partition);
        }
        self.close();
    }
}

pub struct Documents<'a> {
    cursor: &'a mut PartitionedCursor,
    failed: bool,
}

impl Iterator for Documents<'_> {
    type Item = Result<Document, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.cursor.has_next() {
            return None;
        }
        let item = self.cursor.next();
        self.failed = item.is_err();
        Some(item)
    }
}
