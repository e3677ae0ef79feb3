//! Connection leases checked out of the external pool.
//!
//! A [`Lease`] remembers how it was obtained and can only be returned the same
//! way: a keyed checkout is released through its pool token, a bare checkout
//! through the connection handle.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::{Credential, TlsOptions};
use crate::driver::{Checkout, ConnectionPool, PoolKey, PoolToken, SharedConnection};
use crate::errors::ScanError;
use crate::telemetry::ScanMetrics;

/// Which pool protocol a lease is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseProtocol {
    Keyed,
    Handle,
}

impl fmt::Display for LeaseProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyed => f.write_str("keyed"),
            Self::Handle => f.write_str("handle"),
        }
    }
}

enum Release {
    ByKey(PoolToken),
    ByHandle,
}

pub struct Lease {
    id: Uuid,
    pool_key: String,
    protocol: LeaseProtocol,
    connection: SharedConnection,
    // `None` once returned to the pool.
    release: Option<Release>,
    pool: Arc<dyn ConnectionPool>,
    idle_hint: Duration,
    metrics: Arc<ScanMetrics>,
}

impl Lease {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn connection(&self) -> &SharedConnection {
        &self.connection
    }

    #[must_use]
    pub const fn protocol(&self) -> LeaseProtocol {
        self.protocol
    }

    /// Fingerprint of the pool entry this lease came from.
    #[must_use]
    pub fn pool_key(&self) -> &str {
        &self.pool_key
    }

    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.release.is_none()
    }

    /// Return the connection with the idle hint given at acquisition.
    pub fn release(&mut self) -> bool {
        self.release_with(self.idle_hint)
    }

    /// Return the connection to the pool. Returns `false` if the lease was
    /// already released; a second release never reaches the pool.
    pub fn release_with(&mut self, idle_hint: Duration) -> bool {
        let Some(release) = self.release.take() else {
            return false;
        };
        match release {
            Release::ByKey(token) => self.pool.release_key(&token, idle_hint),
            Release::ByHandle => self.pool.release_connection(&self.connection, idle_hint),
        }
        ScanMetrics::incr(&self.metrics.leases_released, 1);
        log::debug!(
            "lease {} released ({}, pool entry {}, idle {}s)",
            self.id,
            self.protocol,
            self.pool_key,
            idle_hint.as_secs()
        );
        true
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("pool_key", &self.pool_key)
            .field("protocol", &self.protocol)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.is_released() {
            log::warn!("lease {} dropped without release; returning it to the pool", self.id);
            self.release();
        }
    }
}

/// Checks connections out of a shared pool on behalf of cursors.
pub struct LeaseManager {
    pool: Arc<dyn ConnectionPool>,
    metrics: Arc<ScanMetrics>,
    idle_hint: Duration,
}

impl LeaseManager {
    #[must_use]
    pub fn new(
        pool: Arc<dyn ConnectionPool>,
        metrics: Arc<ScanMetrics>,
        idle_hint: Duration,
    ) -> Self {
        Self { pool, metrics, idle_hint }
    }

    /// # Errors
    /// Returns `Connectivity` when the pool cannot hand out a connection. Not retried.
    pub fn acquire(
        &self,
        endpoints: &[String],
        credentials: &[Credential],
        tls: Option<&TlsOptions>,
        options: &BTreeMap<String, String>,
    ) -> Result<Lease, ScanError> {
        let key = PoolKey::new(endpoints, credentials, tls, options);
        let pool_key = key.fingerprint();
        let checkout = self.pool.acquire(&key).map_err(|source| {
            log::warn!("acquire failed for pool entry {pool_key}: {source}");
            ScanError::Connectivity { pool_key: pool_key.clone(), source }
        })?;
        let (protocol, connection, release) = match checkout {
            Checkout::Keyed { token, connection } => {
                (LeaseProtocol::Keyed, connection, Release::ByKey(token))
            }
            Checkout::Bare(connection) => (LeaseProtocol::Handle, connection, Release::ByHandle),
        };
        ScanMetrics::incr(&self.metrics.leases_acquired, 1);
        let lease = Lease {
            id: Uuid::new_v4(),
            pool_key,
            protocol,
            connection,
            release: Some(release),
            pool: Arc::clone(&self.pool),
            idle_hint: self.idle_hint,
            metrics: Arc::clone(&self.metrics),
        };
        log::debug!("lease {} acquired ({}, pool entry {})", lease.id, protocol, lease.pool_key);
        Ok(lease)
    }

    /// Idempotent; see [`Lease::release_with`].
    pub fn release(&self, lease: &mut Lease, idle_hint: Duration) -> bool {
        lease.release_with(idle_hint)
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ScanMetrics> {
        &self.metrics
    }

    /// Leases handed out by this manager (and its siblings sharing the
    /// metrics) that have not been released yet.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.metrics.snapshot().leases_outstanding()
    }
}
