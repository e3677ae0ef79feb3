use std::collections::VecDeque;
use std::sync::Arc;

use bson::Document;

use super::pool::PoolCounters;
use crate::driver::{DriverError, NativeCursor};
use crate::telemetry::ScanMetrics;

/// Server-side cursor over a materialized result, handed out in batches.
pub struct MemoryCursor {
    remaining: VecDeque<Document>,
    batch: VecDeque<Document>,
    batch_size: usize,
    served: u64,
    // Fail with a network error once this many documents were served.
    fail_after: Option<u64>,
    closed: bool,
    counters: Arc<PoolCounters>,
}

impl MemoryCursor {
    pub(crate) fn new(
        results: Vec<Document>,
        batch_size: u32,
        fail_after: Option<u64>,
        counters: Arc<PoolCounters>,
    ) -> Self {
        Self {
            remaining: results.into(),
            batch: VecDeque::new(),
            batch_size: usize::try_from(batch_size.max(1)).unwrap_or(usize::MAX),
            served: 0,
            fail_after,
            closed: false,
            counters,
        }
    }

    fn fetch_batch(&mut self) {
        let n = self.batch_size.min(self.remaining.len());
        self.batch.extend(self.remaining.drain(..n));
        ScanMetrics::incr(&self.counters.batches_fetched, 1);
    }
}

impl NativeCursor for MemoryCursor {
    fn try_next(&mut self) -> Result<Option<Document>, DriverError> {
        if self.closed {
            return Err(DriverError::Cursor("cursor already killed".into()));
        }
        if self.fail_after == Some(self.served) {
            self.fail_after = None;
            return Err(DriverError::Network("connection reset during getMore".into()));
        }
        if self.batch.is_empty() {
            if self.remaining.is_empty() {
                return Ok(None);
            }
            self.fetch_batch();
        }
        let next = self.batch.pop_front();
        if next.is_some() {
            self.served += 1;
        }
        Ok(next)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.remaining.clear();
        self.batch.clear();
        ScanMetrics::incr(&self.counters.cursors_killed, 1);
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        if !self.closed {
            ScanMetrics::incr(&self.counters.cursors_leaked, 1);
        }
    }
}
