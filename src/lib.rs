//! Read path of a document-store connector.
//!
//! Filters are pushed down as native query documents, and each partition of a
//! collection is read through its own bounded server-side cursor on a pooled
//! connection. The wire driver and the pool stay behind the traits in
//! [`driver`]; [`memory`] implements them in process.

pub mod config;
pub mod cursor;
pub mod driver;
pub mod errors;
pub mod filter;
pub mod lease;
pub mod logger;
pub mod memory;
pub mod partition;
pub mod session;
pub mod telemetry;
pub mod utils;

pub use config::{Credential, ReadConfig, TlsOptions};
pub use cursor::{CursorState, Documents, PartitionedCursor};
pub use driver::{DriverError, FindRequest};
pub use errors::ScanError;
pub use filter::{FilterExpr, FilterTranslator, Translation, projection};
pub use lease::{Lease, LeaseManager, LeaseProtocol};
pub use partition::PartitionDescriptor;
pub use session::ScanSession;
pub use telemetry::{MetricsSnapshot, ScanMetrics};
