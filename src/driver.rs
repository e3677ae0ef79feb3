//! Contracts of the external driver and connection pool.
//!
//! The read path never speaks a wire protocol itself. It hands a [`FindRequest`]
//! to a [`Connection`], pulls documents from the returned [`NativeCursor`], and
//! checks connections in and out of a [`ConnectionPool`]. Implementations must be
//! thread-safe; the pool is the only state shared between partitions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bson::Document;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::{Credential, TlsOptions};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Cursor error: {0}")]
    Cursor(String),
}

impl DriverError {
    /// Transport-level failures that may succeed on a fresh connection.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Cursor(_))
    }
}

/// One find call against a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct FindRequest {
    pub database: String,
    pub collection: String,
    pub filter: Document,
    pub projection: Document,
    /// Inclusive lower key bound, applied as a server-side `min` hint.
    pub min: Option<Document>,
    /// Exclusive upper key bound, applied as a server-side `max` hint.
    pub max: Option<Document>,
    pub batch_size: u32,
}

pub trait NativeCursor: Send {
    /// Next document, `Ok(None)` once the server-side cursor is drained.
    fn try_next(&mut self) -> Result<Option<Document>, DriverError>;

    /// Kill the server-side cursor. Must be idempotent.
    fn close(&mut self);
}

pub trait Connection: Send + Sync {
    fn find(&self, request: FindRequest) -> Result<Box<dyn NativeCursor>, DriverError>;
}

pub type SharedConnection = Arc<dyn Connection>;

/// Opaque handle a key-tracking pool hands out with a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolToken(pub String);

impl fmt::Display for PoolToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a pool returns from `acquire`.
pub enum Checkout {
    /// The pool tracks the entry; release goes through the token.
    Keyed { token: PoolToken, connection: SharedConnection },
    /// The pool only knows the handle; release goes through the connection itself.
    Bare(SharedConnection),
}

pub trait ConnectionPool: Send + Sync {
    fn acquire(&self, key: &PoolKey) -> Result<Checkout, DriverError>;

    fn release_key(&self, token: &PoolToken, idle_hint: Duration);

    fn release_connection(&self, connection: &SharedConnection, idle_hint: Duration);
}

/// Composite identity of a pool entry: endpoints, credentials and options.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub endpoints: Vec<String>,
    pub credentials: Vec<Credential>,
    pub tls: Option<TlsOptions>,
    pub options: BTreeMap<String, String>,
}

impl PoolKey {
    #[must_use]
    pub fn new(
        endpoints: &[String],
        credentials: &[Credential],
        tls: Option<&TlsOptions>,
        options: &BTreeMap<String, String>,
    ) -> Self {
        Self {
            endpoints: endpoints.to_vec(),
            credentials: credentials.to_vec(),
            tls: tls.cloned(),
            options: options.clone(),
        }
    }

    /// Short stable digest for logs; never exposes credentials.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut h = Sha256::new();
        for e in &self.endpoints {
            h.update(e.as_bytes());
            h.update([0u8]);
        }
        for c in &self.credentials {
            h.update(c.user.as_bytes());
            h.update([0u8]);
            h.update(c.source.as_bytes());
            h.update([0u8]);
            h.update(c.password.as_bytes());
            h.update([1u8]);
        }
        if let Some(tls) = &self.tls {
            h.update(format!("{tls:?}").as_bytes());
        }
        for (k, v) in &self.options {
            h.update(k.as_bytes());
            h.update([b'=']);
            h.update(v.as_bytes());
            h.update([0u8]);
        }
        let digest = hex::encode(h.finalize());
        digest[..16].to_string()
    }
}
