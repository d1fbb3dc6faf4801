//! The packed, length-prefixed slot array shared by lists and vectors.
//!
//! Persisted shapes (all integers little-endian):
//!
//! ```text
//! List:    [u16 element_count][element_count x 5-byte slot]
//! Vector:  [u16 allocated_count][u16 element_count][element_count x 5-byte slot]
//! ```
//!
//! In memory the owned form keeps decoded [`Value`]s in a `Vec` with an
//! explicit allocated count; the borrowed form ([`SlotView`]) decodes slots
//! lazily straight out of read-only image bytes.

use static_assertions::const_assert;

use crate::error::{VmError, VmResult};
use crate::runtime::{SLOT_SIZE, Value};

/// Hard ceiling on the element count of any packed sequence.
pub const MAX_ELEMENTS: usize = 0xFFFF;

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 2;

const_assert!(MAX_ELEMENTS <= u16::MAX as usize);

// =============================================================================
// Layout
// =============================================================================

/// Which of the two persisted shapes a sequence uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Element count followed by slots.
    List,
    /// Allocated count, element count, then slots. Each allocated slot also
    /// costs one dirty bit in memory.
    Vector,
}

impl Layout {
    /// Number of header bytes before the first slot.
    #[inline]
    #[must_use]
    pub const fn header_size(self) -> usize {
        match self {
            Self::List => LENGTH_PREFIX_SIZE,
            Self::Vector => 2 * LENGTH_PREFIX_SIZE,
        }
    }

    /// Bytes needed to hold `count` slots in this layout.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use t3vm_collections::collection::Layout;
    ///
    /// assert_eq!(Layout::List.capacity_bytes(3), 2 + 15);
    /// assert_eq!(Layout::Vector.capacity_bytes(8), 4 + 40 + 1);
    /// ```
    #[must_use]
    pub const fn capacity_bytes(self, count: usize) -> usize {
        let slots = self.header_size() + count * SLOT_SIZE;
        match self {
            Self::List => slots,
            Self::Vector => slots + count.div_ceil(8),
        }
    }

    /// Largest element count this layout can hold within `max_block_size`.
    #[must_use]
    pub const fn max_elements(self, max_block_size: usize) -> usize {
        let usable = max_block_size.saturating_sub(self.header_size());
        let by_block = match self {
            Self::List => usable / SLOT_SIZE,
            // Each slot costs five bytes plus one dirty bit.
            Self::Vector => usable * 8 / (SLOT_SIZE * 8 + 1),
        };
        if by_block < MAX_ELEMENTS {
            by_block
        } else {
            MAX_ELEMENTS
        }
    }

    /// Checks that `count` slots fit, returning the byte footprint.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] if `count` exceeds 65535 or the
    /// footprint exceeds `max_block_size`.
    pub fn check_capacity(self, count: usize, max_block_size: usize) -> VmResult<usize> {
        let maximum = self.max_elements(max_block_size);
        if count > maximum {
            return Err(VmError::SizeLimitExceeded {
                requested: count,
                maximum,
            });
        }
        Ok(self.capacity_bytes(count))
    }
}

// =============================================================================
// Sequence
// =============================================================================

/// Read access shared by every sequence-like storage.
///
/// Indices are zero-based here; the one-based user convention is applied by
/// the collection handles.
pub trait Sequence {
    /// Number of elements.
    fn len(&self) -> usize;

    /// Element at a zero-based index.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] past the end, or
    /// [`VmError::InvalidData`] if a borrowed slot cannot be decoded.
    fn get(&self, index: usize) -> VmResult<Value>;

    /// Returns `true` when there are no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies every element out.
    ///
    /// # Errors
    ///
    /// Propagates decode errors from [`Sequence::get`].
    fn to_values(&self) -> VmResult<Vec<Value>> {
        (0..self.len()).map(|index| self.get(index)).collect()
    }
}

// =============================================================================
// SlotView
// =============================================================================

/// A read-only view over list-shaped bytes owned by someone else.
///
/// Used for constant lists in the program image. A view can never be
/// mutated; building a modified list always copies into a [`PackedSequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotView<'a> {
    slots: &'a [u8],
    count: usize,
}

impl<'a> SlotView<'a> {
    /// Wraps `bytes`, which must start with a length prefix followed by at
    /// least that many complete slots. Trailing bytes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] if the bytes are shorter than the
    /// declared extent.
    pub fn new(bytes: &'a [u8]) -> VmResult<Self> {
        let count = read_u16(bytes, 0)?;
        let end = LENGTH_PREFIX_SIZE + count * SLOT_SIZE;
        let slots = bytes
            .get(LENGTH_PREFIX_SIZE..end)
            .ok_or(VmError::invalid_data("constant list extends past its data"))?;
        Ok(Self { slots, count })
    }

    /// The raw slot bytes.
    #[inline]
    #[must_use]
    pub const fn slot_bytes(&self) -> &'a [u8] {
        self.slots
    }
}

impl Sequence for SlotView<'_> {
    #[inline]
    fn len(&self) -> usize {
        self.count
    }

    fn get(&self, index: usize) -> VmResult<Value> {
        if index >= self.count {
            return Err(VmError::IndexOutOfRange);
        }
        Value::from_slot(&self.slots[index * SLOT_SIZE..])
    }
}

// =============================================================================
// PackedSequence
// =============================================================================

/// An owned slot array with an explicit allocated count.
///
/// `len() <= allocated()` always holds. Growing past the allocated count
/// requires an explicit [`PackedSequence::reallocate`], which is where the
/// owning collection applies its size checks and bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackedSequence {
    slots: Vec<Value>,
    allocated: usize,
}

impl PackedSequence {
    /// Creates an empty sequence with nothing allocated.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            allocated: 0,
        }
    }

    /// Creates an empty sequence with room for `allocated` slots.
    #[must_use]
    pub fn with_allocated(allocated: usize) -> Self {
        Self {
            slots: Vec::with_capacity(allocated),
            allocated,
        }
    }

    /// Creates a sequence of `count` copies of `fill`.
    #[must_use]
    pub fn filled(count: usize, fill: Value) -> Self {
        Self {
            slots: vec![fill; count],
            allocated: count,
        }
    }

    /// Takes ownership of `values`; the allocated count equals their number.
    #[must_use]
    pub fn from_values(values: Vec<Value>) -> Self {
        let allocated = values.len();
        Self {
            slots: values,
            allocated,
        }
    }

    /// Number of elements in use.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` when no elements are in use.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots allocated.
    #[inline]
    #[must_use]
    pub const fn allocated(&self) -> usize {
        self.allocated
    }

    /// The elements in use.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        &self.slots
    }

    /// Overwrites the element at a zero-based index.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] if `index >= len()`.
    pub fn set(&mut self, index: usize, value: Value) -> VmResult<()> {
        let slot = self.slots.get_mut(index).ok_or(VmError::IndexOutOfRange)?;
        *slot = value;
        Ok(())
    }

    /// Appends within the allocated count.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] when every allocated slot is in
    /// use.
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        if self.slots.len() >= self.allocated {
            return Err(VmError::SizeLimitExceeded {
                requested: self.slots.len() + 1,
                maximum: self.allocated,
            });
        }
        self.slots.push(value);
        Ok(())
    }

    /// Changes the element count without touching the allocation. New slots
    /// are filled with `nil`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] if `count > allocated()`.
    pub fn set_len(&mut self, count: usize) -> VmResult<()> {
        if count > self.allocated {
            return Err(VmError::SizeLimitExceeded {
                requested: count,
                maximum: self.allocated,
            });
        }
        self.slots.resize(count, Value::Nil);
        Ok(())
    }

    /// Replaces the allocation with one of `allocated` slots, keeping the
    /// elements in use. Shrinking below the element count truncates.
    pub fn reallocate(&mut self, allocated: usize) {
        self.slots.truncate(allocated);
        if allocated > self.slots.capacity() {
            self.slots.reserve_exact(allocated - self.slots.len());
        } else {
            self.slots.shrink_to(allocated);
        }
        self.allocated = allocated;
    }

    // -------------------------------------------------------------------------
    // Codec
    // -------------------------------------------------------------------------

    /// Serializes in the given layout.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] if a count does not fit in 16
    /// bits.
    pub fn encode(&self, layout: Layout) -> VmResult<Vec<u8>> {
        let count = to_u16(self.len())?;
        let mut bytes = Vec::with_capacity(layout.header_size() + self.len() * SLOT_SIZE);
        if layout == Layout::Vector {
            bytes.extend_from_slice(&to_u16(self.allocated.max(self.len()))?.to_le_bytes());
        }
        bytes.extend_from_slice(&count.to_le_bytes());
        for value in &self.slots {
            bytes.extend_from_slice(&value.to_slot());
        }
        Ok(bytes)
    }

    /// Deserializes from the given layout.
    ///
    /// The declared element count is authoritative: if fewer slot bytes are
    /// present, the missing slots become `nil`; bytes beyond the declared
    /// slots are ignored. For vectors the allocated count is raised to at
    /// least the element count.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] if the header is incomplete or a
    /// present slot has an unknown type tag.
    pub fn decode(bytes: &[u8], layout: Layout) -> VmResult<Self> {
        let (allocated, count) = match layout {
            Layout::List => {
                let count = read_u16(bytes, 0)?;
                (count, count)
            }
            Layout::Vector => {
                let allocated = read_u16(bytes, 0)?;
                let count = read_u16(bytes, LENGTH_PREFIX_SIZE)?;
                (allocated.max(count), count)
            }
        };

        let body = &bytes[layout.header_size()..];
        let available = (body.len() / SLOT_SIZE).min(count);
        let mut sequence = Self::with_allocated(allocated);
        for chunk in body.chunks_exact(SLOT_SIZE).take(available) {
            sequence.slots.push(Value::from_slot(chunk)?);
        }
        sequence.slots.resize(count, Value::Nil);
        Ok(sequence)
    }
}

impl Sequence for PackedSequence {
    #[inline]
    fn len(&self) -> usize {
        self.slots.len()
    }

    fn get(&self, index: usize) -> VmResult<Value> {
        self.slots.get(index).copied().ok_or(VmError::IndexOutOfRange)
    }

    fn to_values(&self) -> VmResult<Vec<Value>> {
        Ok(self.slots.clone())
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> VmResult<usize> {
    bytes
        .get(offset..offset + LENGTH_PREFIX_SIZE)
        .map(|raw| usize::from(u16::from_le_bytes([raw[0], raw[1]])))
        .ok_or(VmError::invalid_data("truncated length prefix"))
}

fn to_u16(count: usize) -> VmResult<u16> {
    u16::try_from(count).map_err(|_| VmError::SizeLimitExceeded {
        requested: count,
        maximum: MAX_ELEMENTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ints(values: &[i32]) -> Vec<Value> {
        values.iter().copied().map(Value::Int).collect()
    }

    // =========================================================================
    // Capacity math
    // =========================================================================

    #[rstest]
    #[case(Layout::List, 0, 2)]
    #[case(Layout::List, 4, 22)]
    #[case(Layout::Vector, 0, 4)]
    #[case(Layout::Vector, 9, 4 + 45 + 2)]
    fn test_capacity_bytes(#[case] layout: Layout, #[case] count: usize, #[case] expected: usize) {
        assert_eq!(layout.capacity_bytes(count), expected);
    }

    #[rstest]
    #[case(Layout::List)]
    #[case(Layout::Vector)]
    fn test_check_capacity_boundary(#[case] layout: Layout) {
        let block = usize::MAX / 16;
        assert!(layout.check_capacity(MAX_ELEMENTS, block).is_ok());
        assert_eq!(
            layout.check_capacity(MAX_ELEMENTS + 1, block),
            Err(VmError::SizeLimitExceeded {
                requested: MAX_ELEMENTS + 1,
                maximum: MAX_ELEMENTS,
            })
        );
    }

    #[rstest]
    fn test_check_capacity_respects_block_size() {
        let block = Layout::List.capacity_bytes(10);
        assert_eq!(Layout::List.max_elements(block), 10);
        assert!(Layout::List.check_capacity(10, block).is_ok());
        assert!(Layout::List.check_capacity(11, block).is_err());
    }

    #[rstest]
    fn test_vector_max_elements_accounts_for_dirty_bits() {
        let block = Layout::Vector.capacity_bytes(64);
        assert_eq!(Layout::Vector.max_elements(block), 64);
    }

    // =========================================================================
    // Codec
    // =========================================================================

    #[rstest]
    fn test_encode_list_layout() {
        let sequence = PackedSequence::from_values(ints(&[1, 2]));
        let bytes = sequence.encode(Layout::List).unwrap();
        assert_eq!(bytes, vec![2, 0, 7, 1, 0, 0, 0, 7, 2, 0, 0, 0]);
    }

    #[rstest]
    fn test_encode_vector_layout_writes_allocation_first() {
        let mut sequence = PackedSequence::with_allocated(10);
        sequence.push(Value::Nil).unwrap();
        let bytes = sequence.encode(Layout::Vector).unwrap();
        assert_eq!(bytes, vec![10, 0, 1, 0, 1, 0, 0, 0, 0]);
    }

    #[rstest]
    #[case(Layout::List)]
    #[case(Layout::Vector)]
    fn test_decode_pads_short_input_with_nil(#[case] layout: Layout) {
        let full = PackedSequence::from_values(ints(&[1, 2, 3]))
            .encode(layout)
            .unwrap();
        let short = &full[..full.len() - SLOT_SIZE - 2];
        let decoded = PackedSequence::decode(short, layout).unwrap();
        assert_eq!(decoded.as_slice(), &[Value::Int(1), Value::Nil, Value::Nil]);
    }

    #[rstest]
    fn test_decode_ignores_trailing_bytes() {
        let mut bytes = PackedSequence::from_values(ints(&[7]))
            .encode(Layout::List)
            .unwrap();
        bytes.extend_from_slice(&Value::Int(8).to_slot());
        let decoded = PackedSequence::decode(&bytes, Layout::List).unwrap();
        assert_eq!(decoded.as_slice(), &[Value::Int(7)]);
    }

    #[rstest]
    fn test_decode_vector_raises_allocation_to_count() {
        let bytes = [1, 0, 2, 0, 7, 5, 0, 0, 0, 7, 6, 0, 0, 0];
        let decoded = PackedSequence::decode(&bytes, Layout::Vector).unwrap();
        assert_eq!(decoded.allocated(), 2);
        assert_eq!(decoded.len(), 2);
    }

    #[rstest]
    fn test_decode_rejects_truncated_header() {
        assert!(PackedSequence::decode(&[3], Layout::List).is_err());
        assert!(PackedSequence::decode(&[3, 0, 1], Layout::Vector).is_err());
    }

    // =========================================================================
    // Owned mutation
    // =========================================================================

    #[rstest]
    fn test_set_len_nil_fills_and_truncates() {
        let mut sequence = PackedSequence::with_allocated(4);
        sequence.push(Value::Int(1)).unwrap();
        sequence.set_len(3).unwrap();
        assert_eq!(sequence.as_slice(), &[Value::Int(1), Value::Nil, Value::Nil]);
        sequence.set_len(1).unwrap();
        assert_eq!(sequence.len(), 1);
        assert_eq!(sequence.allocated(), 4);
    }

    #[rstest]
    fn test_set_len_beyond_allocation_fails() {
        let mut sequence = PackedSequence::with_allocated(2);
        assert!(sequence.set_len(3).is_err());
    }

    #[rstest]
    fn test_push_respects_allocation() {
        let mut sequence = PackedSequence::with_allocated(1);
        sequence.push(Value::True).unwrap();
        assert!(sequence.push(Value::True).is_err());
    }

    #[rstest]
    fn test_reallocate_keeps_elements() {
        let mut sequence = PackedSequence::from_values(ints(&[1, 2]));
        sequence.reallocate(20);
        assert_eq!(sequence.allocated(), 20);
        assert_eq!(sequence.as_slice(), ints(&[1, 2]).as_slice());
    }

    // =========================================================================
    // SlotView
    // =========================================================================

    #[rstest]
    fn test_slot_view_reads_in_place() {
        let bytes = PackedSequence::from_values(ints(&[4, 5, 6]))
            .encode(Layout::List)
            .unwrap();
        let view = SlotView::new(&bytes).unwrap();
        assert_eq!(view.len(), 3);
        assert_eq!(view.get(2).unwrap(), Value::Int(6));
        assert_eq!(view.get(3), Err(VmError::IndexOutOfRange));
        assert_eq!(view.to_values().unwrap(), ints(&[4, 5, 6]));
    }

    #[rstest]
    fn test_slot_view_rejects_short_bytes() {
        assert!(SlotView::new(&[2, 0, 7, 1, 0, 0, 0]).is_err());
    }
}
