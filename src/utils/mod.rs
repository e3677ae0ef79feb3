//! Shared helpers: developer logging and integer conversions.
pub mod devlog;
pub mod num;
