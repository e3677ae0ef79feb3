use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::ScanError;

pub const DEFAULT_BATCH_SIZE: u32 = 101;
pub const DEFAULT_LEASE_IDLE_SECS: u64 = 120;

/// A login used when checking out a pooled connection.
#[derive(Clone, PartialEq, Eq, Hash, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    pub user: String,
    /// Database the user authenticates against.
    #[serde(default = "default_auth_source")]
    pub source: String,
    pub(crate) password: String,
}

/// One worker per available core, falling back to 4.
#[must_use]
pub fn default_max_workers() -> usize {
    std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(4).max(1)
}

fn default_auth_source() -> String {
    "admin".to_string()
}

impl Credential {
    #[must_use]
    pub fn new(user: &str, source: &str, password: &str) -> Self {
        Self { user: user.to_string(), source: source.to_string(), password: password.to_string() }
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("source", &self.source)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    pub enabled: bool,
    pub ca_file: Option<PathBuf>,
    pub allow_invalid_certificates: bool,
}

/// Settings for the read path.
///
/// Loading precedence is left to the caller; `load` + `apply_env` covers the
/// common file-then-environment case.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReadConfig {
    pub database: String,
    pub collection: String,
    pub batch_size: u32,
    /// Coerce string literals compared against `_id` into ObjectIds.
    pub id_as_object_id: bool,
    pub credentials: Vec<Credential>,
    pub tls: Option<TlsOptions>,
    /// Passed through untouched to the pool key.
    pub connection_options: BTreeMap<String, String>,
    pub lease_idle_secs: u64,
    /// Upper bound on partitions read at once, and so on leases held at once.
    pub max_workers: usize,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            database: String::new(),
            collection: String::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            id_as_object_id: false,
            credentials: Vec::new(),
            tls: None,
            connection_options: BTreeMap::new(),
            lease_idle_secs: DEFAULT_LEASE_IDLE_SECS,
            max_workers: default_max_workers(),
        }
    }
}

impl ReadConfig {
    #[must_use]
    pub fn new(database: &str, collection: &str) -> Self {
        Self { database: database.to_string(), collection: collection.to_string(), ..Self::default() }
    }

    /// # Errors
    /// Returns an error if the TOML is malformed.
    pub fn from_toml_str(s: &str) -> Result<Self, ScanError> {
        Ok(toml::from_str::<Self>(s)?)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| ScanError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&s)
    }

    /// Overlay environment variables:
    /// - DOCSCAN_DATABASE
    /// - DOCSCAN_COLLECTION
    /// - DOCSCAN_BATCH_SIZE
    /// - DOCSCAN_ID_AS_OBJECT_ID
    /// - DOCSCAN_LEASE_IDLE_SECS
    /// - DOCSCAN_MAX_WORKERS
    #[must_use]
    pub fn apply_env(self) -> Self {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(s) = var("DOCSCAN_DATABASE") {
            self.database = s;
        }
        if let Some(s) = var("DOCSCAN_COLLECTION") {
            self.collection = s;
        }
        if let Some(n) = var("DOCSCAN_BATCH_SIZE").and_then(|s| s.parse::<u32>().ok()) {
            self.batch_size = n;
        }
        if let Some(s) = var("DOCSCAN_ID_AS_OBJECT_ID") {
            self.id_as_object_id = matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(n) = var("DOCSCAN_LEASE_IDLE_SECS").and_then(|s| s.parse::<u64>().ok()) {
            self.lease_idle_secs = n;
        }
        if let Some(n) = var("DOCSCAN_MAX_WORKERS").and_then(|s| s.parse::<usize>().ok()) {
            self.max_workers = n;
        }
        self
    }

    /// # Errors
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.database.trim().is_empty() {
            return Err(ScanError::Config("database must be set".into()));
        }
        if self.collection.trim().is_empty() {
            return Err(ScanError::Config("collection must be set".into()));
        }
        if self.batch_size == 0 {
            return Err(ScanError::Config("batch_size must be greater than zero".into()));
        }
        if self.max_workers == 0 {
            return Err(ScanError::Config("max_workers must be greater than zero".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn lease_idle_hint(&self) -> Duration {
        Duration::from_secs(self.lease_idle_secs)
    }
}
