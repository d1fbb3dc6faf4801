//! Runtime limits and tuning knobs.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{VmError, VmResult};

/// Default maximum size of a single heap block, in bytes.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// Configuration shared by the heap, the undo journal and the collections.
///
/// # Examples
///
/// ```rust
/// use t3vm_collections::VmConfig;
///
/// let config = VmConfig::default()
///     .with_gc_interval(1)
///     .with_max_savepoints(4);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.vector_growth_increment, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VmConfig {
    /// Largest single allocation the heap accepts.
    pub max_block_size: usize,
    /// Upper bound on total heap bytes; `None` means unlimited.
    pub memory_limit: Option<usize>,
    /// Allocations between automatic collections; `0` disables them.
    pub gc_interval: usize,
    /// Minimum number of slots a vector grows by when it reallocates.
    pub vector_growth_increment: usize,
    /// Capacity of a vector constructed without an explicit size.
    pub vector_default_capacity: usize,
    /// Depth at which recursive equality and hashing give up.
    pub max_comparison_depth: usize,
    /// Number of undo records the journal holds across all savepoints.
    pub undo_record_capacity: usize,
    /// Number of savepoints kept before the oldest is discarded.
    pub max_savepoints: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            memory_limit: None,
            gc_interval: 4096,
            vector_growth_increment: 16,
            vector_default_capacity: 10,
            max_comparison_depth: 256,
            undo_record_capacity: 16384,
            max_savepoints: 32,
        }
    }
}

impl VmConfig {
    /// Sets the maximum block size.
    #[must_use]
    pub const fn with_max_block_size(mut self, bytes: usize) -> Self {
        self.max_block_size = bytes;
        self
    }

    /// Sets the total memory limit.
    #[must_use]
    pub const fn with_memory_limit(mut self, bytes: Option<usize>) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Sets the automatic collection interval.
    ///
    /// An interval of `1` collects before every allocation, which is useful
    /// for shaking out missing roots in tests.
    #[must_use]
    pub const fn with_gc_interval(mut self, allocations: usize) -> Self {
        self.gc_interval = allocations;
        self
    }

    /// Sets the vector growth increment.
    #[must_use]
    pub const fn with_vector_growth_increment(mut self, slots: usize) -> Self {
        self.vector_growth_increment = slots;
        self
    }

    /// Sets the default vector capacity.
    #[must_use]
    pub const fn with_vector_default_capacity(mut self, slots: usize) -> Self {
        self.vector_default_capacity = slots;
        self
    }

    /// Sets the comparison depth guard.
    #[must_use]
    pub const fn with_max_comparison_depth(mut self, depth: usize) -> Self {
        self.max_comparison_depth = depth;
        self
    }

    /// Sets the undo record capacity.
    #[must_use]
    pub const fn with_undo_record_capacity(mut self, records: usize) -> Self {
        self.undo_record_capacity = records;
        self
    }

    /// Sets the number of retained savepoints.
    #[must_use]
    pub const fn with_max_savepoints(mut self, savepoints: usize) -> Self {
        self.max_savepoints = savepoints;
        self
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::BadValue`] when the growth increment or the
    /// savepoint limit is zero.
    pub fn validate(&self) -> VmResult<()> {
        if self.vector_growth_increment == 0 {
            return Err(VmError::bad_value("vector growth increment must be positive"));
        }
        if self.max_savepoints == 0 {
            return Err(VmError::bad_value("at least one savepoint must be retained"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_default_matches_runtime_constants() {
        let config = VmConfig::default();
        assert_eq!(config.vector_growth_increment, 16);
        assert_eq!(config.vector_default_capacity, 10);
        assert_eq!(config.max_comparison_depth, 256);
        assert!(config.memory_limit.is_none());
    }

    #[rstest]
    #[case(VmConfig::default().with_vector_growth_increment(0))]
    #[case(VmConfig::default().with_max_savepoints(0))]
    fn test_validate_rejects_zero_limits(#[case] config: VmConfig) {
        assert!(matches!(config.validate(), Err(VmError::BadValue { .. })));
    }

    #[rstest]
    fn test_builders_chain() {
        let config = VmConfig::default()
            .with_memory_limit(Some(1024))
            .with_undo_record_capacity(8)
            .with_max_block_size(512);
        assert_eq!(config.memory_limit, Some(1024));
        assert_eq!(config.undo_record_capacity, 8);
        assert_eq!(config.max_block_size, 512);
    }

    #[cfg(feature = "serde")]
    #[rstest]
    fn test_serde_round_trip_fills_missing_fields() {
        let config: VmConfig = serde_json::from_str(r#"{ "gc_interval": 3 }"#).unwrap();
        assert_eq!(config.gc_interval, 3);
        assert_eq!(config.max_savepoints, 32);

        let json = serde_json::to_string(&config).unwrap();
        let restored: VmConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }
}
