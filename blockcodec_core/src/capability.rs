use std::ops::RangeInclusive;

use crate::error::Result;

/// What a compression backend reports about itself.
///
/// Bounds are queried from the linked library rather than hardcoded, because
/// different builds of the same library report different ranges.
pub trait Capabilities: Send + Sync {
    /// Backend library name, used in error messages.
    fn backend(&self) -> &str;

    /// Valid compression levels.
    fn level_range(&self) -> RangeInclusive<i64>;

    /// Valid window-log values for long-range matching.
    ///
    /// Fails with [`CodecError::UnsupportedCapability`](crate::CodecError::UnsupportedCapability)
    /// when the backend has no such tunable.
    fn window_log_bounds(&self) -> Result<RangeInclusive<i64>>;

    /// Upper bound on compressed output for `source_size` input bytes, valid
    /// for every parameter combination the backend accepts.
    fn max_compressed_size(&self, source_size: usize) -> usize;
}
