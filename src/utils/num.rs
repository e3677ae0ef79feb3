//! Integer conversions used when reporting counts and durations.

#[inline]
#[must_use]
pub fn usize_to_u64(v: usize) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

/// Clamp a `Duration::as_millis` value into a `u64` for logs and metrics.
#[inline]
#[must_use]
pub fn millis_to_u64(v: u128) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}
