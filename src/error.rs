//! Error types for collection operations.
//!
//! Every fallible operation in this crate returns [`VmResult`]. Errors are
//! reported synchronously to the immediate caller and never retried
//! internally.

use thiserror::Error;

use crate::runtime::ObjectId;

/// Errors raised by the collection subsystem and its runtime collaborators.
///
/// # Examples
///
/// ```rust
/// use t3vm_collections::VmError;
///
/// let error = VmError::SizeLimitExceeded { requested: 65536, maximum: 65535 };
/// assert_eq!(
///     error.to_string(),
///     "size limit exceeded: 65536 elements requested, maximum is 65535"
/// );
/// ```
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    /// An index was below 1 or beyond the bound the operation accepts.
    #[error("index out of range")]
    IndexOutOfRange,

    /// An element or allocation count would exceed the 16-bit ceiling or
    /// the allocator's maximum block size.
    #[error("size limit exceeded: {requested} elements requested, maximum is {maximum}")]
    SizeLimitExceeded {
        /// The element count that was requested.
        requested: usize,
        /// The largest element count that can be represented.
        maximum: usize,
    },

    /// An operand did not have the required type.
    #[error("wrong type: expected {expected}")]
    WrongType {
        /// A short description of the accepted type.
        expected: &'static str,
    },

    /// A numeric argument was outside its documented range.
    #[error("bad value: {reason}")]
    BadValue {
        /// Why the value was rejected.
        reason: &'static str,
    },

    /// Equality or hashing recursed past the configured depth guard.
    #[error("tree too deep for comparison")]
    TreeTooDeepForComparison,

    /// Two values have no defined ordering.
    #[error("invalid comparison")]
    InvalidComparison,

    /// The heap could not satisfy an allocation, even after collecting.
    #[error("out of memory: {requested} bytes requested")]
    OutOfMemory {
        /// Number of bytes the failed allocation asked for.
        requested: usize,
    },

    /// A handle referred to a reclaimed object or to an object of another kind.
    #[error("invalid object reference {0}")]
    InvalidObject(ObjectId),

    /// Image or save-file bytes were malformed.
    #[error("invalid data: {reason}")]
    InvalidData {
        /// What was wrong with the bytes.
        reason: &'static str,
    },

    /// The undo journal could not hold a new record even after discarding
    /// every older savepoint.
    #[error("undo journal exhausted")]
    UndoJournalExhausted,

    /// A user callback failed inside the interpreter.
    #[error("callback failed: {message}")]
    Callback {
        /// The interpreter's description of the failure.
        message: String,
    },
}

/// Result alias used throughout the crate.
pub type VmResult<T> = Result<T, VmError>;

impl VmError {
    /// Builds a [`VmError::WrongType`].
    #[inline]
    #[must_use]
    pub const fn wrong_type(expected: &'static str) -> Self {
        Self::WrongType { expected }
    }

    /// Builds a [`VmError::BadValue`].
    #[inline]
    #[must_use]
    pub const fn bad_value(reason: &'static str) -> Self {
        Self::BadValue { reason }
    }

    /// Builds a [`VmError::InvalidData`].
    #[inline]
    #[must_use]
    pub const fn invalid_data(reason: &'static str) -> Self {
        Self::InvalidData { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(VmError::IndexOutOfRange, "index out of range")]
    #[case(VmError::wrong_type("list"), "wrong type: expected list")]
    #[case(VmError::bad_value("negative count"), "bad value: negative count")]
    #[case(VmError::TreeTooDeepForComparison, "tree too deep for comparison")]
    #[case(VmError::OutOfMemory { requested: 40 }, "out of memory: 40 bytes requested")]
    #[case(VmError::invalid_data("truncated header"), "invalid data: truncated header")]
    fn test_display(#[case] error: VmError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    fn test_invalid_object_display_includes_id() {
        let error = VmError::InvalidObject(ObjectId::from_raw(7));
        assert_eq!(error.to_string(), "invalid object reference #7");
    }
}
