//! Read-only constant pool from the program image.
//!
//! Constant lists and strings are referenced by byte offset
//! ([`Value::List`], [`Value::SString`]). Lists are read in place through a
//! [`SlotView`]; nothing here is ever copied or mutated.

use crate::collection::{Layout, PackedSequence, SlotView};
use crate::error::{VmError, VmResult};
use crate::runtime::Value;

/// View over the constant-pool bytes of a loaded program image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstantPool<'a> {
    bytes: &'a [u8],
}

impl<'a> ConstantPool<'a> {
    /// Wraps the pool bytes.
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Total size of the pool.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` for an empty pool.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The constant list starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] if the offset or the list extent is
    /// outside the pool.
    pub fn list_at(&self, offset: u32) -> VmResult<SlotView<'a>> {
        SlotView::new(self.tail(offset)?)
    }

    /// The constant string starting at `offset`: a two-byte length followed
    /// by UTF-8 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] if the string is out of bounds or is
    /// not valid UTF-8.
    pub fn string_at(&self, offset: u32) -> VmResult<&'a str> {
        let tail = self.tail(offset)?;
        let length = tail
            .get(..2)
            .map(|raw| usize::from(u16::from_le_bytes([raw[0], raw[1]])))
            .ok_or(VmError::invalid_data("truncated string length"))?;
        let body = tail
            .get(2..2 + length)
            .ok_or(VmError::invalid_data("constant string extends past its data"))?;
        std::str::from_utf8(body).map_err(|_| VmError::invalid_data("constant string is not UTF-8"))
    }

    fn tail(&self, offset: u32) -> VmResult<&'a [u8]> {
        usize::try_from(offset)
            .ok()
            .and_then(|start| self.bytes.get(start..))
            .ok_or(VmError::invalid_data("constant offset outside the pool"))
    }
}

/// Assembles constant-pool bytes, mostly for loaders and tests.
///
/// # Examples
///
/// ```rust
/// use t3vm_collections::runtime::{ConstantPool, ConstantPoolBuilder, Value};
///
/// let mut builder = ConstantPoolBuilder::new();
/// let greeting = builder.add_string("hello");
/// let bytes = builder.finish();
///
/// let Value::SString(offset) = greeting else { unreachable!() };
/// assert_eq!(ConstantPool::new(&bytes).string_at(offset).unwrap(), "hello");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConstantPoolBuilder {
    bytes: Vec<u8>,
}

impl ConstantPoolBuilder {
    /// Starts an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a list and returns the value referring to it.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] for more than 65535 elements.
    pub fn add_list(&mut self, values: &[Value]) -> VmResult<Value> {
        let offset = self.offset();
        let encoded = PackedSequence::from_values(values.to_vec()).encode(Layout::List)?;
        self.bytes.extend_from_slice(&encoded);
        Ok(Value::List(offset))
    }

    /// Appends a string and returns the value referring to it. Strings
    /// longer than 65535 bytes are truncated at a character boundary.
    pub fn add_string(&mut self, text: &str) -> Value {
        let offset = self.offset();
        let mut end = text.len().min(usize::from(u16::MAX));
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let length = u16::try_from(end).unwrap_or(u16::MAX);
        self.bytes.extend_from_slice(&length.to_le_bytes());
        self.bytes.extend_from_slice(&text.as_bytes()[..end]);
        Value::SString(offset)
    }

    /// Returns the finished pool bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }

    fn offset(&self) -> u32 {
        u32::try_from(self.bytes.len()).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Sequence;
    use rstest::rstest;

    #[rstest]
    fn test_list_and_string_offsets() {
        let mut builder = ConstantPoolBuilder::new();
        let list = builder.add_list(&[Value::Int(1), Value::True]).unwrap();
        let text = builder.add_string("abc");
        let bytes = builder.finish();
        let pool = ConstantPool::new(&bytes);

        let (Value::List(list_offset), Value::SString(text_offset)) = (list, text) else {
            panic!("unexpected constant kinds");
        };
        let view = pool.list_at(list_offset).unwrap();
        assert_eq!(view.to_values().unwrap(), vec![Value::Int(1), Value::True]);
        assert_eq!(pool.string_at(text_offset).unwrap(), "abc");
    }

    #[rstest]
    #[case(100)]
    #[case(u32::MAX)]
    fn test_offsets_outside_pool_are_rejected(#[case] offset: u32) {
        let bytes = [0u8, 0];
        let pool = ConstantPool::new(&bytes);
        assert!(matches!(pool.list_at(offset), Err(VmError::InvalidData { .. })));
        assert!(matches!(pool.string_at(offset), Err(VmError::InvalidData { .. })));
    }

    #[rstest]
    fn test_truncated_string_is_rejected() {
        let bytes = [5u8, 0, b'a'];
        assert!(ConstantPool::new(&bytes).string_at(0).is_err());
    }
}
