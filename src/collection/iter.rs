//! Index iterators over lists and vectors.
//!
//! An iterator walks a one-based range `[first, last]` that is fixed when it
//! is created. Whether it sees later changes depends on what it wraps: the
//! snapshot constructors hand it a private copy, the live constructor the
//! vector itself.

use tracing::warn;

use crate::collection::list::signed;
use crate::error::{VmError, VmResult};
use crate::runtime::{Object, ObjectId, SLOT_SIZE, Trace, Tracer, UndoRecord, Value, Vm};

/// Set while the cursor has an undo record in the current savepoint.
pub const FLAG_UNDO: u16 = 0x0001;

// =============================================================================
// IndexIterator
// =============================================================================

/// Cursor state of one iterator object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexIterator {
    collection: Value,
    cursor: i32,
    first: i32,
    last: i32,
    flags: u16,
}

impl IndexIterator {
    /// Size of the saved form, and the heap bytes charged per iterator.
    pub const FOOTPRINT: usize = SLOT_SIZE + 3 * 4 + 2;

    /// An iterator over `[first, last]` of `collection`, positioned before
    /// `first`.
    #[must_use]
    pub const fn new(collection: Value, first: i32, last: i32) -> Self {
        Self {
            collection,
            cursor: first - 1,
            first,
            last,
            flags: 0,
        }
    }

    /// The iterated collection.
    #[inline]
    #[must_use]
    pub const fn collection(&self) -> Value {
        self.collection
    }

    /// The one-based index last returned, or `first - 1` before the start.
    #[inline]
    #[must_use]
    pub const fn cursor(&self) -> i32 {
        self.cursor
    }

    /// The inclusive index range.
    #[inline]
    #[must_use]
    pub const fn range(&self) -> (i32, i32) {
        (self.first, self.last)
    }

    /// Whether another element follows the cursor.
    #[inline]
    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.cursor < self.last
    }

    fn current_index(&self) -> VmResult<i32> {
        if self.cursor < 1 || self.cursor > self.last {
            return Err(VmError::IndexOutOfRange);
        }
        Ok(self.cursor)
    }

    /// Serializes the iterator.
    #[must_use]
    pub fn save(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::FOOTPRINT);
        bytes.extend_from_slice(&self.collection.to_slot());
        bytes.extend_from_slice(&self.cursor.to_le_bytes());
        bytes.extend_from_slice(&self.first.to_le_bytes());
        bytes.extend_from_slice(&self.last.to_le_bytes());
        bytes.extend_from_slice(&self.flags.to_le_bytes());
        bytes
    }

    /// Rebuilds an iterator from [`IndexIterator::save`] output.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] if `bytes` is too short or the
    /// collection slot is malformed.
    pub fn restore(bytes: &[u8]) -> VmResult<Self> {
        if bytes.len() < Self::FOOTPRINT {
            return Err(VmError::invalid_data("saved iterator is truncated"));
        }
        let collection = Value::from_slot(&bytes[..SLOT_SIZE])?;
        let (cursor, first, last) = (
            read_i32(bytes, SLOT_SIZE),
            read_i32(bytes, SLOT_SIZE + 4),
            read_i32(bytes, SLOT_SIZE + 8),
        );
        let flags = u16::from_le_bytes([bytes[SLOT_SIZE + 12], bytes[SLOT_SIZE + 13]]);
        Ok(Self {
            collection,
            cursor,
            first,
            last,
            flags,
        })
    }

    /// Restores the cursor from an undo record.
    pub fn apply_undo(&mut self, record: &UndoRecord) {
        match i32::try_from(record.key) {
            Ok(cursor) => self.cursor = cursor,
            Err(_) => warn!(key = record.key, "ignoring iterator undo record"),
        }
    }

    /// Allows the cursor to be journalled again.
    pub fn notify_new_savepoint(&mut self) {
        self.flags &= !FLAG_UNDO;
    }
}

impl Trace for IndexIterator {
    fn mark_refs(&self, tracer: &mut Tracer) {
        tracer.mark(&self.collection);
    }
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

// =============================================================================
// IterRef
// =============================================================================

/// Handle to an iterator object.
///
/// # Examples
///
/// ```rust
/// use t3vm_collections::VmConfig;
/// use t3vm_collections::collection::VectorRef;
/// use t3vm_collections::runtime::{Value, Vm};
///
/// let mut vm = Vm::new(VmConfig::default())?;
/// let vector = VectorRef::create_from_values(&mut vm, &[Value::Int(1), Value::Int(2)])?;
/// let iterator = vector.new_iterator(&mut vm)?;
///
/// let mut seen = Vec::new();
/// while iterator.is_next_available(&vm)? {
///     seen.push(iterator.get_next(&mut vm)?);
/// }
/// assert_eq!(seen, vec![Value::Int(1), Value::Int(2)]);
/// # Ok::<(), t3vm_collections::VmError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IterRef {
    id: ObjectId,
}

impl IterRef {
    /// Creates an iterator over the first `len` elements of `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::OutOfMemory`] if the heap is exhausted.
    pub fn create(vm: &mut Vm<'_>, collection: Value, len: usize) -> VmResult<Self> {
        let last = i32::try_from(signed(len)).map_err(|_| VmError::SizeLimitExceeded {
            requested: len,
            maximum: crate::collection::MAX_ELEMENTS,
        })?;
        let _guard = vm.root(&[collection]);
        let id = vm.allocate(Object::Iterator(IndexIterator::new(collection, 1, last)))?;
        Ok(Self { id })
    }

    /// Recreates an iterator from [`IterRef::save`] output.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] for truncated or malformed bytes.
    pub fn restore(vm: &mut Vm<'_>, bytes: &[u8]) -> VmResult<Self> {
        let iterator = IndexIterator::restore(bytes)?;
        let _guard = vm.root(&[iterator.collection]);
        let id = vm.allocate(Object::Iterator(iterator))?;
        Ok(Self { id })
    }

    /// Wraps an object id without checking it.
    #[inline]
    #[must_use]
    pub const fn from_id(id: ObjectId) -> Self {
        Self { id }
    }

    /// The iterator as a value.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> Value {
        Value::Obj(self.id)
    }

    fn state(self, vm: &Vm<'_>) -> VmResult<IndexIterator> {
        vm.heap().iterator(self.id).copied()
    }

    /// Advances and returns the next element.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] past the end of the range, or
    /// when a live iterator's vector has shrunk below the cursor.
    pub fn get_next(&self, vm: &mut Vm<'_>) -> VmResult<Value> {
        let state = self.state(vm)?;
        let index = state.cursor + 1;
        if index > state.last {
            return Err(VmError::IndexOutOfRange);
        }
        let value = element_at(vm, &state.collection, index)?;
        self.set_cursor(vm, index)?;
        Ok(value)
    }

    /// Whether [`IterRef::get_next`] would succeed on the range.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidObject`] for a reclaimed iterator.
    pub fn is_next_available(&self, vm: &Vm<'_>) -> VmResult<bool> {
        Ok(self.state(vm)?.has_next())
    }

    /// Moves back before the first element.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::UndoJournalExhausted`] if the move cannot be
    /// journalled.
    pub fn reset(&self, vm: &mut Vm<'_>) -> VmResult<()> {
        let first = self.state(vm)?.first;
        self.set_cursor(vm, first - 1)
    }

    /// The one-based index of the current element.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] before the first
    /// [`IterRef::get_next`] or past the end.
    pub fn get_cur_key(&self, vm: &Vm<'_>) -> VmResult<Value> {
        self.state(vm)?.current_index().map(Value::Int)
    }

    /// The current element.
    ///
    /// # Errors
    ///
    /// See [`IterRef::get_cur_key`].
    pub fn get_cur_val(&self, vm: &Vm<'_>) -> VmResult<Value> {
        let state = self.state(vm)?;
        let index = state.current_index()?;
        element_at(vm, &state.collection, index)
    }

    /// Serializes the iterator.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidObject`] for a reclaimed iterator.
    pub fn save(&self, vm: &Vm<'_>) -> VmResult<Vec<u8>> {
        Ok(self.state(vm)?.save())
    }

    fn set_cursor(self, vm: &mut Vm<'_>, cursor: i32) -> VmResult<()> {
        let state = self.state(vm)?;
        if state.flags & FLAG_UNDO == 0 && vm.journaling(self.id)? {
            let key = u32::try_from(state.cursor).unwrap_or_default();
            vm.add_undo_record(UndoRecord {
                owner: self.id,
                key,
                old_value: Value::Nil,
            })?;
            vm.heap_mut().iterator_mut(self.id)?.flags |= FLAG_UNDO;
        }
        vm.heap_mut().iterator_mut(self.id)?.cursor = cursor;
        Ok(())
    }
}

fn element_at(vm: &Vm<'_>, collection: &Value, index: i32) -> VmResult<Value> {
    let position = usize::try_from(index - 1).map_err(|_| VmError::IndexOutOfRange)?;
    vm.sequence_get(collection, position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{ListRef, VectorRef};
    use crate::config::VmConfig;
    use rstest::rstest;

    fn ints(values: &[i32]) -> Vec<Value> {
        values.iter().copied().map(Value::Int).collect()
    }

    fn drain(vm: &mut Vm<'_>, iterator: IterRef) -> Vec<Value> {
        let mut seen = Vec::new();
        while iterator.is_next_available(vm).unwrap() {
            seen.push(iterator.get_next(vm).unwrap());
        }
        seen
    }

    #[rstest]
    fn test_list_iterator_walks_every_element() {
        let mut vm = Vm::new(VmConfig::default()).unwrap();
        let list = ListRef::create(&mut vm, &ints(&[4, 5, 6])).unwrap();
        let iterator = list.new_iterator(&mut vm).unwrap();

        assert_eq!(drain(&mut vm, iterator), ints(&[4, 5, 6]));
        assert_eq!(iterator.get_next(&mut vm), Err(VmError::IndexOutOfRange));
        assert_eq!(iterator.get_cur_key(&vm).unwrap(), Value::Int(3));
        assert_eq!(iterator.get_cur_val(&vm).unwrap(), Value::Int(6));
    }

    #[rstest]
    fn test_current_is_undefined_before_first_step() {
        let mut vm = Vm::new(VmConfig::default()).unwrap();
        let list = ListRef::create(&mut vm, &ints(&[1])).unwrap();
        let iterator = list.new_iterator(&mut vm).unwrap();
        assert_eq!(iterator.get_cur_key(&vm), Err(VmError::IndexOutOfRange));
        assert_eq!(iterator.get_cur_val(&vm), Err(VmError::IndexOutOfRange));
    }

    #[rstest]
    fn test_empty_collection_has_nothing_next() {
        let mut vm = Vm::new(VmConfig::default()).unwrap();
        let vector = VectorRef::create(&mut vm, 4).unwrap();
        let iterator = vector.new_iterator(&mut vm).unwrap();
        assert!(!iterator.is_next_available(&vm).unwrap());
    }

    #[rstest]
    fn test_snapshot_ignores_later_changes_but_live_sees_them() {
        let mut vm = Vm::new(VmConfig::default()).unwrap();
        let vector = VectorRef::create_from_values(&mut vm, &ints(&[1, 2])).unwrap();
        let snapshot = vector.new_iterator(&mut vm).unwrap();
        let live = vector.new_live_iterator(&mut vm).unwrap();

        vector.set(&mut vm, 1, Value::Int(9)).unwrap();
        vector.append(&mut vm, Value::Int(3)).unwrap();

        assert_eq!(drain(&mut vm, snapshot), ints(&[1, 2]));
        assert_eq!(drain(&mut vm, live), ints(&[9, 2]));
    }

    #[rstest]
    fn test_reset_starts_over() {
        let mut vm = Vm::new(VmConfig::default()).unwrap();
        let list = ListRef::create(&mut vm, &ints(&[1, 2])).unwrap();
        let iterator = list.new_iterator(&mut vm).unwrap();
        drain(&mut vm, iterator);
        iterator.reset(&mut vm).unwrap();
        assert_eq!(iterator.get_next(&mut vm).unwrap(), Value::Int(1));
    }

    #[rstest]
    fn test_cursor_is_restored_by_undo() {
        let mut vm = Vm::new(VmConfig::default()).unwrap();
        let list = ListRef::create(&mut vm, &ints(&[1, 2, 3])).unwrap();
        let iterator = list.new_iterator(&mut vm).unwrap();
        iterator.get_next(&mut vm).unwrap();

        vm.create_savepoint();
        iterator.get_next(&mut vm).unwrap();
        iterator.get_next(&mut vm).unwrap();
        assert_eq!(vm.undo().record_count(), 1);

        vm.undo_to_savepoint();
        assert_eq!(iterator.get_cur_key(&vm).unwrap(), Value::Int(1));
        assert_eq!(iterator.get_next(&mut vm).unwrap(), Value::Int(2));
    }

    #[rstest]
    fn test_save_and_restore() {
        let mut vm = Vm::new(VmConfig::default()).unwrap();
        let list = ListRef::create(&mut vm, &ints(&[7, 8])).unwrap();
        let iterator = list.new_iterator(&mut vm).unwrap();
        iterator.get_next(&mut vm).unwrap();

        let bytes = iterator.save(&vm).unwrap();
        assert_eq!(bytes.len(), IndexIterator::FOOTPRINT);

        let restored = IterRef::restore(&mut vm, &bytes).unwrap();
        assert_eq!(restored.get_next(&mut vm).unwrap(), Value::Int(8));
        assert!(IterRef::restore(&mut vm, &bytes[..10]).is_err());
    }

    #[rstest]
    fn test_iterator_keeps_its_snapshot_alive() {
        let mut vm = Vm::new(VmConfig::default()).unwrap();
        let vector = VectorRef::create_from_values(&mut vm, &ints(&[1, 2])).unwrap();
        let iterator = vector.new_iterator(&mut vm).unwrap();
        vm.add_global_root(iterator.value());

        vm.collect_garbage();
        assert_eq!(drain(&mut vm, iterator), ints(&[1, 2]));
    }
}
