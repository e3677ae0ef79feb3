//! Embedded implementation of the driver seam.
//!
//! Runs the whole read path in process: a [`MemoryStore`] evaluates the native
//! query, bound and projection documents, and a [`MemoryPool`] hands out
//! connections to it with either release protocol. Faults can be injected at
//! acquire, find and mid-stream to exercise the failure paths.

mod cursor;
mod eval;
mod pool;
mod store;

pub use cursor::MemoryCursor;
pub use pool::{CheckoutMode, MemoryConnection, MemoryPool, PoolStats};
pub use store::MemoryStore;
