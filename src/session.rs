use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bson::Document;

use crate::config::ReadConfig;
use crate::cursor::PartitionedCursor;
use crate::driver::ConnectionPool;
use crate::errors::ScanError;
use crate::filter::{FilterExpr, FilterTranslator, projection};
use crate::lease::LeaseManager;
use crate::partition::PartitionDescriptor;
use crate::telemetry::ScanMetrics;
use crate::utils::num::usize_to_u64;

/// Composition root of the read path: one translator and one lease manager,
/// producing a cursor per partition on demand.
pub struct ScanSession {
    config: Arc<ReadConfig>,
    translator: FilterTranslator,
    leases: Arc<LeaseManager>,
}

impl ScanSession {
    /// # Errors
    /// Returns `Config` if the configuration does not validate.
    pub fn new(config: ReadConfig, pool: Arc<dyn ConnectionPool>) -> Result<Self, ScanError> {
        config.validate()?;
        let metrics = Arc::new(ScanMetrics::default());
        let leases = Arc::new(LeaseManager::new(pool, metrics, config.lease_idle_hint()));
        let translator = FilterTranslator::from_config(&config);
        log::info!(
            "scan session on {}.{} (batch size {}, id coercion {})",
            config.database,
            config.collection,
            config.batch_size,
            config.id_as_object_id
        );
        Ok(Self { config: Arc::new(config), translator, leases })
    }

    #[must_use]
    pub const fn translator(&self) -> &FilterTranslator {
        &self.translator
    }

    #[must_use]
    pub fn config(&self) -> &ReadConfig {
        &self.config
    }

    #[must_use]
    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ScanMetrics> {
        self.leases.metrics()
    }

    /// An unopened cursor wired to this session's lease manager.
    #[must_use]
    pub fn cursor(&self) -> PartitionedCursor {
        PartitionedCursor::new(Arc::clone(&self.leases), Arc::clone(&self.config))
    }

    /// Translate `filters`, project `fields`, and open a cursor on `partition`.
    ///
    /// Sub-filters that could not be pushed down are logged and counted; the
    /// cursor then returns a superset the caller must filter again.
    ///
    /// # Errors
    /// Translation and open failures come back as `Read` for the partition.
    pub fn open_partition<S: AsRef<str>>(
        &self,
        partition: &PartitionDescriptor,
        filters: &[FilterExpr],
        fields: &[S],
    ) -> Result<PartitionedCursor, ScanError> {
        let translation = self
            .translator
            .translate_with_report(filters)
            .map_err(|e| ScanError::read(&partition.id, e))?;
        if !translation.is_exact() {
            ScanMetrics::incr(
                &self.metrics().clauses_degraded,
                usize_to_u64(translation.degradations.len()),
            );
            for d in &translation.degradations {
                log::debug!("partition {}: not pushed down ({:?}): {}", partition.id, d.reason, d.filter);
            }
        }
        let mut cursor = self.cursor();
        cursor.open(partition, translation.query, projection(fields))?;
        Ok(cursor)
    }

    /// Open, drain and close one partition.
    ///
    /// # Errors
    /// See [`ScanSession::open_partition`]; read failures mid-stream as well.
    pub fn read_partition<S: AsRef<str>>(
        &self,
        partition: &PartitionDescriptor,
        filters: &[FilterExpr],
        fields: &[S],
    ) -> Result<Vec<Document>, ScanError> {
        let mut cursor = self.open_partition(partition, filters, fields)?;
        let docs = cursor.documents().collect::<Result<Vec<_>, _>>();
        cursor.close();
        docs
    }

    /// Drain `partitions` on at most `max_workers` scoped worker threads, so at
    /// most that many leases are held at once. Workers pull the next partition
    /// from a shared index. Results come back in partition order; one partition
    /// failing does not stop the others.
    pub fn read_partitions<S: AsRef<str> + Sync>(
        &self,
        partitions: &[PartitionDescriptor],
        filters: &[FilterExpr],
        fields: &[S],
    ) -> Vec<Result<Vec<Document>, ScanError>> {
        let workers = self.config.max_workers.clamp(1, partitions.len().max(1));
        let next = AtomicUsize::new(0);
        let mut slots: Vec<Option<Result<Vec<Document>, ScanError>>> =
            partitions.iter().map(|_| None).collect();
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    s.spawn(|| {
                        let mut done = Vec::new();
                        loop {
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(p) = partitions.get(i) else {
                                break;
                            };
                            done.push((i, self.read_partition(p, filters, fields)));
                        }
                        done
                    })
                })
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(done) => {
                        for (i, result) in done {
                            slots[i] = Some(result);
                        }
                    }
                    Err(_) => log::error!("partition worker panicked"),
                }
            }
        });
        self.metrics().log_snapshot("read_partitions");
        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(ScanError::InvalidState("partition worker panicked".into())))
            })
            .collect()
    }
}
