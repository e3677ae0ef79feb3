use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by a scan session, its lease manager and its cursors.
#[derive(Debug, Default)]
pub struct ScanMetrics {
    pub leases_acquired: AtomicU64,
    pub leases_released: AtomicU64,
    pub cursors_opened: AtomicU64,
    pub cursors_closed: AtomicU64,
    pub open_failures: AtomicU64,
    pub documents_read: AtomicU64,
    pub clauses_degraded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub leases_acquired: u64,
    pub leases_released: u64,
    pub cursors_opened: u64,
    pub cursors_closed: u64,
    pub open_failures: u64,
    pub documents_read: u64,
    pub clauses_degraded: u64,
}

impl MetricsSnapshot {
    #[must_use]
    pub const fn leases_outstanding(&self) -> u64 {
        self.leases_acquired.saturating_sub(self.leases_released)
    }
}

impl ScanMetrics {
    pub(crate) fn incr(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            leases_acquired: self.leases_acquired.load(Ordering::Relaxed),
            leases_released: self.leases_released.load(Ordering::Relaxed),
            cursors_opened: self.cursors_opened.load(Ordering::Relaxed),
            cursors_closed: self.cursors_closed.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            documents_read: self.documents_read.load(Ordering::Relaxed),
            clauses_degraded: self.clauses_degraded.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn metrics_text(&self) -> String {
        // OpenMetrics/Prometheus exposition format (no types/HELP for brevity)
        let m = self.snapshot();
        format!(
            "docscan_leases_acquired_total {}\n\
             docscan_leases_released_total {}\n\
             docscan_cursors_opened_total {}\n\
             docscan_cursors_closed_total {}\n\
             docscan_open_failures_total {}\n\
             docscan_documents_read_total {}\n\
             docscan_clauses_degraded_total {}\n",
            m.leases_acquired,
            m.leases_released,
            m.cursors_opened,
            m.cursors_closed,
            m.open_failures,
            m.documents_read,
            m.clauses_degraded,
        )
    }

    /// Emit the current counters on the `docscan::metrics` log target.
    pub fn log_snapshot(&self, label: &str) {
        let m = self.snapshot();
        log::info!(
            target: "docscan::metrics",
            "{label}: leases={}/{} cursors={}/{} open_failures={} documents={} degraded={}",
            m.leases_acquired,
            m.leases_released,
            m.cursors_opened,
            m.cursors_closed,
            m.open_failures,
            m.documents_read,
            m.clauses_degraded
        );
    }
}
