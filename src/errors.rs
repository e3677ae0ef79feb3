use thiserror::Error;

use crate::driver::DriverError;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Identifier coercion error: cannot convert {literal} on '{attribute}': {reason}")]
    IdentifierCoercion { attribute: String, literal: String, reason: String },

    #[error("Connectivity error for pool entry {pool_key}: {source}")]
    Connectivity {
        pool_key: String,
        #[source]
        source: DriverError,
    },

    #[error("Read error on partition {partition}: {source}")]
    Read {
        partition: String,
        #[source]
        source: Box<ScanError>,
    },

    #[error("Driver: {0}")]
    Driver(#[from] DriverError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(String),
}

impl ScanError {
    /// Wraps `cause` into the read-error kind reported for a partition.
    pub(crate) fn read(partition: &str, cause: impl Into<Self>) -> Self {
        Self::Read { partition: partition.to_string(), source: Box::new(cause.into()) }
    }

    /// Whether a caller may reasonably re-open a fresh cursor after this error.
    ///
    /// Nothing inside the crate retries; this only classifies.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connectivity { source, .. } | Self::Driver(source) => source.is_transient(),
            Self::Read { source, .. } => source.is_retryable(),
            Self::IdentifierCoercion { .. }
            | Self::InvalidState(_)
            | Self::Config(_)
            | Self::Toml(_)
            | Self::Io(_) => false,
        }
    }

    /// Partition id carried by a read error, if any.
    #[must_use]
    pub fn partition(&self) -> Option<&str> {
        match self {
            Self::Read { partition, .. } => Some(partition),
            _ => None,
        }
    }

    /// Innermost crate error, skipping `Read` wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Read { source, .. } => source.root(),
            other => other,
        }
    }
}
