//! Mutable vectors with transactional undo.
//!
//! A [`Vector`] is changed in place. Every overwrite of an existing slot and
//! every change of the element count is journalled so that
//! [`Vm::undo_to_savepoint`] can restore the exact previous contents. At
//! most one record per slot is emitted per savepoint; [`DirtyBits`] tracks
//! which slots already have one.
//!
//! Shrinking captures each doomed slot *before* the element-count record is
//! emitted, because rollback replays newest first: the count is restored,
//! then the slots.

use smallvec::{SmallVec, smallvec};
use tracing::{debug, warn};

use crate::collection::algebra::{self, Direction, Extreme};
use crate::collection::list::{
    clamp_count, element_index, forced_start, from_end, normalize_negative, signed,
};
use crate::collection::sort::{self, SortContext, Sortable};
use crate::collection::{IterRef, Layout, ListRef, MAX_ELEMENTS, PackedSequence, Sequence};
use crate::error::{VmError, VmResult};
use crate::runtime::{Object, ObjectId, Trace, Tracer, UndoRecord, Value, Vm};

// =============================================================================
// DirtyBits
// =============================================================================

/// One bit per allocated slot: set once the slot has an undo record in the
/// current savepoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirtyBits {
    words: SmallVec<[u64; 2]>,
    len: usize,
}

impl DirtyBits {
    /// All-clear bits for `len` slots.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            words: smallvec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Number of slots covered.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when no slots are covered.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether slot `index` is dirty. Slots outside the range are clean.
    #[inline]
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1 << (index % 64)) != 0
    }

    /// Marks slot `index` dirty.
    #[inline]
    pub fn insert(&mut self, index: usize) {
        if index < self.len {
            self.words[index / 64] |= 1 << (index % 64);
        }
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Number of dirty slots.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }
}

// =============================================================================
// Vector
// =============================================================================

/// A growable sequence stored in the heap.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vector {
    data: PackedSequence,
    dirty: DirtyBits,
}

impl Vector {
    /// An empty vector with room for `capacity` elements.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_sequence(PackedSequence::with_allocated(capacity))
    }

    /// A vector holding `values`, allocated to exactly their number.
    #[must_use]
    pub fn from_values(values: Vec<Value>) -> Self {
        Self::from_sequence(PackedSequence::from_values(values))
    }

    fn from_sequence(data: PackedSequence) -> Self {
        let dirty = DirtyBits::new(data.allocated());
        Self { data, dirty }
    }

    /// Number of elements in use.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` when no elements are in use.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of allocated slots.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.data.allocated()
    }

    /// The elements in use.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        self.data.as_slice()
    }

    /// Which slots are already journalled in the current savepoint.
    #[inline]
    #[must_use]
    pub const fn dirty_bits(&self) -> &DirtyBits {
        &self.dirty
    }

    /// Heap bytes charged for this vector, dirty bits included.
    #[must_use]
    pub const fn footprint(&self) -> usize {
        Layout::Vector.capacity_bytes(self.data.allocated())
    }

    /// Serializes in the vector layout.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] if a count does not fit.
    pub fn save(&self) -> VmResult<Vec<u8>> {
        self.data.encode(Layout::Vector)
    }

    /// Rebuilds a vector from [`Vector::save`] output, which must hold every
    /// declared slot.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] for truncated or malformed bytes.
    pub fn restore(bytes: &[u8]) -> VmResult<Self> {
        let vector = Self::load_from_image(bytes)?;
        let needed = Layout::Vector.header_size() + vector.len() * crate::runtime::SLOT_SIZE;
        if bytes.len() < needed {
            return Err(VmError::invalid_data("saved vector is truncated"));
        }
        Ok(vector)
    }

    /// Loads a vector from image bytes.
    ///
    /// Missing slots become `nil`, trailing bytes are ignored and the
    /// allocated count is raised to at least the element count.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] if the header is incomplete or a
    /// slot is malformed.
    pub fn load_from_image(bytes: &[u8]) -> VmResult<Self> {
        Ok(Self::from_sequence(PackedSequence::decode(
            bytes,
            Layout::Vector,
        )?))
    }

    /// Replays one undo record.
    pub fn apply_undo(&mut self, record: &UndoRecord) {
        let restored = if record.is_length() {
            let count = record
                .old_value
                .as_int()
                .and_then(|count| usize::try_from(count).ok())
                .unwrap_or(0);
            self.data.set_len(count)
        } else {
            self.data.set(record.key as usize, record.old_value)
        };
        if let Err(error) = restored {
            warn!(key = record.key, %error, "could not apply vector undo record");
        }
    }

    /// Forgets which slots were journalled.
    pub fn notify_new_savepoint(&mut self) {
        self.dirty.clear();
    }
}

impl Sequence for Vector {
    #[inline]
    fn len(&self) -> usize {
        self.data.len()
    }

    fn get(&self, index: usize) -> VmResult<Value> {
        Sequence::get(&self.data, index)
    }

    fn to_values(&self) -> VmResult<Vec<Value>> {
        Ok(self.data.as_slice().to_vec())
    }
}

impl Trace for Vector {
    fn mark_refs(&self, tracer: &mut Tracer) {
        tracer.mark_all(self.data.as_slice());
    }
}

// =============================================================================
// VectorRef
// =============================================================================

/// Handle to a vector object.
///
/// Handle methods take one-based indices. Methods that change the vector
/// journal their changes when a savepoint is active and the vector existed
/// before it.
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
///
/// vm.create_savepoint();
/// vector.append(&mut vm, Value::Int(3))?;
/// assert_eq!(vector.len(&vm)?, 3);
///
/// vm.undo_to_savepoint();
/// assert_eq!(vector.values(&vm)?, vec![Value::Int(1), Value::Int(2)]);
/// # Ok::<(), t3vm_collections::VmError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorRef {
    id: ObjectId,
}

impl VectorRef {
    /// Wraps an object id without checking it.
    #[inline]
    #[must_use]
    pub const fn from_id(id: ObjectId) -> Self {
        Self { id }
    }

    /// Wraps a vector value.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] unless `value` refers to a vector.
    pub fn new(vm: &Vm<'_>, value: Value) -> VmResult<Self> {
        match value {
            Value::Obj(id) if vm.heap().vector(id).is_ok() => Ok(Self { id }),
            _ => Err(VmError::wrong_type("vector")),
        }
    }

    /// The object id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ObjectId {
        self.id
    }

    /// The vector as a value.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> Value {
        Value::Obj(self.id)
    }

    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// An empty vector with room for `capacity` elements.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] for more than 65535 slots and
    /// [`VmError::OutOfMemory`] if the heap is exhausted.
    pub fn create(vm: &mut Vm<'_>, capacity: usize) -> VmResult<Self> {
        Self::with_values(vm, Vec::new(), capacity)
    }

    /// A vector holding a copy of `values`.
    ///
    /// # Errors
    ///
    /// See [`VectorRef::create`].
    pub fn create_from_values(vm: &mut Vm<'_>, values: &[Value]) -> VmResult<Self> {
        Self::with_values(vm, values.to_vec(), values.len())
    }

    /// A vector of `count` copies of `value`.
    ///
    /// # Errors
    ///
    /// See [`VectorRef::create`].
    pub fn create_filled(vm: &mut Vm<'_>, count: usize, value: Value) -> VmResult<Self> {
        let _guard = vm.root(&[value]);
        Self::with_values(vm, vec![value; count], count)
    }

    /// A vector holding a copy of a list-like value's elements, with room
    /// for at least `capacity` elements.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] if `source` is not list-like.
    pub fn create_from(vm: &mut Vm<'_>, source: &Value, capacity: Option<usize>) -> VmResult<Self> {
        let values = vm
            .sequence_values(source)?
            .ok_or(VmError::wrong_type("list-like value"))?;
        let _guard = vm.root(&[*source]);
        let capacity = capacity.unwrap_or(0).max(values.len());
        Self::with_values(vm, values, capacity)
    }

    /// Constructor call with zero, one or two arguments.
    ///
    /// - no arguments: an empty vector with the default capacity;
    /// - an integer: an empty vector with that capacity;
    /// - a list-like value: a copy of its elements;
    /// - an integer capacity, then a list-like source to copy or an integer
    ///   number of `nil` elements.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] for other argument types and
    /// [`VmError::BadValue`] for negative sizes or more than two arguments.
    pub fn construct(vm: &mut Vm<'_>, arguments: &[Value]) -> VmResult<Self> {
        let size = |value: &Value| -> VmResult<usize> {
            usize::try_from(value.expect_int()?).map_err(|_| VmError::bad_value("negative size"))
        };
        match arguments {
            [] => {
                let capacity = vm.config().vector_default_capacity;
                Self::create(vm, capacity)
            }
            [Value::Int(_)] => Self::create(vm, size(&arguments[0])?),
            [source] => Self::create_from(vm, source, None),
            [capacity, Value::Int(_)] => {
                let count = size(&arguments[1])?;
                let capacity = size(capacity)?.max(count);
                Self::with_values(vm, vec![Value::Nil; count], capacity)
            }
            [capacity, source] if vm.is_sequence(source) => {
                let capacity = size(capacity)?;
                Self::create_from(vm, source, Some(capacity))
            }
            [_, _] => Err(VmError::wrong_type("capacity or list-like source")),
            _ => Err(VmError::bad_value("too many constructor arguments")),
        }
    }

    /// `f(i)` for `i` in `1..=count`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] if `function` is not callable and
    /// [`VmError::BadValue`] for a negative count.
    pub fn generate(vm: &mut Vm<'_>, function: Value, count: i32) -> VmResult<Self> {
        let guard = vm.root(&[]);
        let values = algebra::generate(vm, function, count, &guard)?;
        let capacity = values.len();
        Self::with_values(vm, values, capacity)
    }

    /// A new vector with the same elements and the same allocation.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::OutOfMemory`] if the heap is exhausted.
    pub fn create_copy(&self, vm: &mut Vm<'_>) -> VmResult<Self> {
        let vector = vm.heap().vector(self.id)?;
        let copy = Vector::from_sequence(vector.data.clone());
        let _guard = vm.root(&[self.value()]);
        Self::allocate(vm, copy)
    }

    /// Recreates a vector from [`VectorRef::save`] output.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] for truncated or malformed bytes.
    pub fn restore(vm: &mut Vm<'_>, bytes: &[u8]) -> VmResult<Self> {
        let vector = Vector::restore(bytes)?;
        Self::allocate(vm, vector)
    }

    /// Creates a vector from image bytes, tolerating a short slot range.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] if the header is incomplete.
    pub fn load_from_image(vm: &mut Vm<'_>, bytes: &[u8]) -> VmResult<Self> {
        let vector = Vector::load_from_image(bytes)?;
        Self::allocate(vm, vector)
    }

    fn with_values(vm: &mut Vm<'_>, values: Vec<Value>, capacity: usize) -> VmResult<Self> {
        let capacity = capacity.max(values.len());
        Layout::Vector.check_capacity(capacity, vm.config().max_block_size)?;
        let mut data = PackedSequence::with_allocated(capacity);
        for value in values {
            data.push(value)?;
        }
        Self::allocate(vm, Vector::from_sequence(data))
    }

    fn allocate(vm: &mut Vm<'_>, vector: Vector) -> VmResult<Self> {
        let id = vm.allocate(Object::Vector(vector))?;
        Ok(Self { id })
    }

    // -------------------------------------------------------------------------
    // Access
    // -------------------------------------------------------------------------

    /// Number of elements.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidObject`] if the vector was reclaimed.
    pub fn len(&self, vm: &Vm<'_>) -> VmResult<usize> {
        Ok(vm.heap().vector(self.id)?.len())
    }

    /// Returns `true` for an empty vector.
    ///
    /// # Errors
    ///
    /// See [`VectorRef::len`].
    pub fn is_empty(&self, vm: &Vm<'_>) -> VmResult<bool> {
        Ok(self.len(vm)? == 0)
    }

    /// Number of allocated slots.
    ///
    /// # Errors
    ///
    /// See [`VectorRef::len`].
    pub fn capacity(&self, vm: &Vm<'_>) -> VmResult<usize> {
        Ok(vm.heap().vector(self.id)?.capacity())
    }

    /// Element at a one-based index in `1..=len`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] outside the vector.
    pub fn get(&self, vm: &Vm<'_>, index: i32) -> VmResult<Value> {
        let vector = vm.heap().vector(self.id)?;
        let position = element_index(i64::from(index), vector.len())?;
        Sequence::get(vector, position)
    }

    /// Copies every element out.
    ///
    /// # Errors
    ///
    /// See [`VectorRef::len`].
    pub fn values(&self, vm: &Vm<'_>) -> VmResult<Vec<Value>> {
        Ok(vm.heap().vector(self.id)?.as_slice().to_vec())
    }

    /// Serializes the vector.
    ///
    /// # Errors
    ///
    /// See [`VectorRef::len`].
    pub fn save(&self, vm: &Vm<'_>) -> VmResult<Vec<u8>> {
        vm.heap().vector(self.id)?.save()
    }

    fn element(self, vm: &Vm<'_>, index: usize) -> VmResult<Value> {
        Sequence::get(vm.heap().vector(self.id)?, index)
    }

    // -------------------------------------------------------------------------
    // Undo-aware primitives
    // -------------------------------------------------------------------------

    /// Overwrites a slot without journalling. Only for slots the current
    /// operation created.
    fn store(self, vm: &mut Vm<'_>, index: usize, value: Value) -> VmResult<()> {
        vm.heap_mut().vector_mut(self.id)?.data.set(index, value)
    }

    /// Overwrites a slot, journalling its old value first if this is the
    /// slot's first change in the current savepoint.
    pub(crate) fn set_element_undo(
        self,
        vm: &mut Vm<'_>,
        index: usize,
        value: Value,
    ) -> VmResult<()> {
        if vm.journaling(self.id)? {
            let vector = vm.heap().vector(self.id)?;
            if !vector.dirty.contains(index) {
                let old_value = Sequence::get(vector, index)?;
                vm.add_undo_record(UndoRecord::slot(self.id, index, old_value))?;
                vm.heap_mut().vector_mut(self.id)?.dirty.insert(index);
            }
        }
        self.store(vm, index, value)
    }

    /// Changes the element count, journalling the change.
    ///
    /// Doomed slots are captured first, then the count record is emitted.
    /// Growth past the allocation reallocates to
    /// `max(capacity + growth increment, count)` and clears the dirty bits.
    /// New slots are `nil`.
    pub(crate) fn set_element_count_undo(self, vm: &mut Vm<'_>, count: usize) -> VmResult<()> {
        let maximum = Layout::Vector.max_elements(vm.config().max_block_size);
        if count > maximum {
            return Err(VmError::SizeLimitExceeded {
                requested: count,
                maximum,
            });
        }
        let _guard = vm.root(&[self.value()]);
        let old_count = self.len(vm)?;
        if vm.journaling(self.id)? {
            for index in count..old_count {
                self.set_element_undo(vm, index, Value::Nil)?;
            }
            vm.add_undo_record(UndoRecord::length(self.id, old_count))?;
        }

        let capacity = self.capacity(vm)?;
        if count > capacity {
            let grown = (capacity + vm.config().vector_growth_increment)
                .max(count)
                .min(maximum);
            let additional =
                Layout::Vector.capacity_bytes(grown) - Layout::Vector.capacity_bytes(capacity);
            vm.reserve(additional)?;
            let vector = vm.heap_mut().vector_mut(self.id)?;
            vector.data.reallocate(grown);
            vector.dirty = DirtyBits::new(grown);
            vm.heap_mut().refresh_footprint(self.id)?;
            debug!(vector = %self.id, from = capacity, to = grown, "reallocated vector");
        }
        vm.heap_mut().vector_mut(self.id)?.data.set_len(count)
    }

    /// Grows the element count by `added` `nil` slots.
    pub(crate) fn expand_by(self, vm: &mut Vm<'_>, added: usize) -> VmResult<()> {
        let count = self.len(vm)? + added;
        self.set_element_count_undo(vm, count)
    }

    /// Opens `added` slots at zero-based `at`, moving the tail up. The
    /// opened slots keep stale values for the caller to overwrite.
    pub(crate) fn insert_elements_undo(
        self,
        vm: &mut Vm<'_>,
        at: usize,
        added: usize,
    ) -> VmResult<()> {
        let old_count = self.len(vm)?;
        self.set_element_count_undo(vm, old_count + added)?;
        for index in (at..old_count).rev() {
            let value = self.element(vm, index)?;
            let target = index + added;
            if target < old_count {
                self.set_element_undo(vm, target, value)?;
            } else {
                self.store(vm, target, value)?;
            }
        }
        Ok(())
    }

    /// Deletes `removed` slots at zero-based `at`, moving the tail down.
    pub(crate) fn remove_elements_undo(
        self,
        vm: &mut Vm<'_>,
        at: usize,
        removed: usize,
    ) -> VmResult<()> {
        let count = self.len(vm)?;
        for index in at..count {
            let source = index + removed;
            let value = if source < count {
                self.element(vm, source)?
            } else {
                Value::Nil
            };
            self.set_element_undo(vm, index, value)?;
        }
        self.set_element_count_undo(vm, count - removed)
    }

    // -------------------------------------------------------------------------
    // Element access
    // -------------------------------------------------------------------------

    /// Stores `value` at a one-based index. An index past the end first
    /// grows the vector, filling the gap with `nil`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] for `index < 1` and
    /// [`VmError::SizeLimitExceeded`] when growth would pass the limit.
    pub fn set(&self, vm: &mut Vm<'_>, index: i32, value: Value) -> VmResult<()> {
        if index < 1 {
            return Err(VmError::IndexOutOfRange);
        }
        let position = forced_start(i64::from(index));
        let _guard = vm.root(&[self.value(), value]);
        if position < self.len(vm)? {
            self.set_element_undo(vm, position, value)
        } else {
            self.set_element_count_undo(vm, position + 1)?;
            self.store(vm, position, value)
        }
    }

    /// Sets the element count. New elements are `nil`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::BadValue`] for a negative length and
    /// [`VmError::SizeLimitExceeded`] above 65535.
    pub fn set_length(&self, vm: &mut Vm<'_>, length: i32) -> VmResult<()> {
        let length =
            usize::try_from(length).map_err(|_| VmError::bad_value("negative vector length"))?;
        if length > MAX_ELEMENTS {
            return Err(VmError::SizeLimitExceeded {
                requested: length,
                maximum: MAX_ELEMENTS,
            });
        }
        self.set_element_count_undo(vm, length)
    }

    // -------------------------------------------------------------------------
    // Equality and arithmetic
    // -------------------------------------------------------------------------

    /// Element-wise equality against any list-like value. A vector always
    /// equals itself.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::TreeTooDeepForComparison`] for distinct but
    /// structurally identical cycles.
    pub fn equals(&self, vm: &Vm<'_>, other: &Value, depth: usize) -> VmResult<bool> {
        vm.values_equal(&self.value(), other, depth)
    }

    /// Hash consistent with [`VectorRef::equals`].
    ///
    /// # Errors
    ///
    /// Returns [`VmError::TreeTooDeepForComparison`] for self-containing
    /// vectors.
    pub fn calc_hash(&self, vm: &Vm<'_>, depth: usize) -> VmResult<u32> {
        vm.calc_hash(&self.value(), depth)
    }

    /// `self + rhs` as a new vector; a list-like `rhs` is flattened one
    /// level.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] if the result is too long.
    pub fn add(&self, vm: &mut Vm<'_>, rhs: Value) -> VmResult<Self> {
        let _guard = vm.root(&[self.value(), rhs]);
        let values = algebra::concat(vm, &self.value(), &rhs)?;
        let capacity = values.len();
        Self::with_values(vm, values, capacity)
    }

    /// `self - rhs` as a new vector.
    ///
    /// # Errors
    ///
    /// Propagates equality errors.
    pub fn sub(&self, vm: &mut Vm<'_>, rhs: Value) -> VmResult<Self> {
        let _guard = vm.root(&[self.value(), rhs]);
        let values = algebra::difference(vm, &self.value(), &rhs)?;
        let capacity = self.len(vm)?;
        Self::with_values(vm, values, capacity)
    }

    /// A list of up to `count` elements from a one-based `start`.
    ///
    /// A negative start counts from the end and a start below 1 becomes 1.
    /// The count is clamped to what is available; a negative count gives an
    /// empty list.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::OutOfMemory`] if the heap is exhausted.
    pub fn to_list(
        &self,
        vm: &mut Vm<'_>,
        start: Option<i32>,
        count: Option<i32>,
    ) -> VmResult<ListRef> {
        let values = self.values(vm)?;
        let len = values.len();
        let start = forced_start(normalize_negative(start.unwrap_or(1), len)).min(len);
        let count = clamp_count(count.map_or(signed(len), i64::from), len - start);
        let _guard = vm.root(&[self.value()]);
        ListRef::from_values(vm, values[start..start + count].to_vec())
    }

    // -------------------------------------------------------------------------
    // Bulk updates
    // -------------------------------------------------------------------------

    /// Copies `count` elements of a list-like `source`, starting at
    /// `source_start`, over this vector starting at `start`, growing it as
    /// needed.
    ///
    /// Negative starts count from the end and starts below 1 become 1. The
    /// count is clamped to what the source can supply.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] if `source` is not list-like.
    pub fn copy_from(
        &self,
        vm: &mut Vm<'_>,
        source: Value,
        source_start: i32,
        start: i32,
        count: i32,
    ) -> VmResult<()> {
        let source_len = vm.sequence_len(&source)?;
        let len = self.len(vm)?;
        let source_start = forced_start(normalize_negative(source_start, source_len));
        let start = forced_start(normalize_negative(start, len));
        let count = if source_start >= source_len {
            0
        } else {
            clamp_count(i64::from(count), source_len - source_start)
        };

        let _guard = vm.root(&[self.value(), source]);
        if start + count > len {
            self.set_element_count_undo(vm, start + count)?;
        }
        for offset in 0..count {
            let value = vm.sequence_get(&source, source_start + offset)?;
            self.set_element_undo(vm, start + offset, value)?;
        }
        Ok(())
    }

    /// Stores `value` in `count` slots from a one-based `start` (default 1),
    /// or through the current end when no count is given. Grows as needed.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] when growth would pass the
    /// limit.
    pub fn fill_val(
        &self,
        vm: &mut Vm<'_>,
        value: Value,
        start: Option<i32>,
        count: Option<i32>,
    ) -> VmResult<()> {
        let len = self.len(vm)?;
        let start = forced_start(normalize_negative(start.unwrap_or(1), len));
        let end = match count {
            Some(count) => clamp_count(signed(start) + i64::from(count), usize::MAX),
            None => len,
        };

        let _guard = vm.root(&[self.value(), value]);
        if end > len {
            self.set_element_count_undo(vm, end)?;
        }
        for index in start..end {
            self.set_element_undo(vm, index, value)?;
        }
        Ok(())
    }

    /// Replaces every element with `function(element)`, in place.
    ///
    /// # Errors
    ///
    /// Propagates callback errors; elements already replaced stay replaced.
    pub fn apply_all(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<()> {
        let _guard = vm.root(&[self.value(), function]);
        let mut index = 0;
        while index < self.len(vm)? {
            let element = self.element(vm, index)?;
            let result = vm.invoke(function, &[element])?;
            self.set_element_undo(vm, index, result)?;
            index += 1;
        }
        Ok(())
    }

    /// Sorts in place, journalling every moved slot.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidComparison`] for unordered elements and
    /// [`VmError::WrongType`] if the comparator does not return an integer.
    pub fn sort(
        &self,
        vm: &mut Vm<'_>,
        descending: bool,
        comparator: Option<Value>,
    ) -> VmResult<()> {
        let context = SortContext::new(descending, comparator);
        let guard = vm.root(&[self.value()]);
        if let Some(function) = context.callback() {
            guard.keep(function);
        }
        let mut sorter = VectorSorter::new(*self, context);
        sort::sort(vm, &mut sorter)
    }

    // -------------------------------------------------------------------------
    // Insertion and removal
    // -------------------------------------------------------------------------

    /// Adds `value` as the last element, without flattening.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] when the vector is full.
    pub fn append(&self, vm: &mut Vm<'_>, value: Value) -> VmResult<()> {
        let len = self.len(vm)?;
        let _guard = vm.root(&[self.value(), value]);
        self.expand_by(vm, 1)?;
        self.set_element_undo(vm, len, value)
    }

    /// Adds the elements of a list-like `value`, or `value` itself if it is
    /// not list-like.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] when the result is too long.
    pub fn append_all(&self, vm: &mut Vm<'_>, value: Value) -> VmResult<()> {
        let additions = vm.sequence_values(&value)?.unwrap_or_else(|| vec![value]);
        let len = self.len(vm)?;
        let _guard = vm.root(&[self.value(), value]);
        self.expand_by(vm, additions.len())?;
        for (offset, addition) in additions.into_iter().enumerate() {
            self.store(vm, len + offset, addition)?;
        }
        Ok(())
    }

    /// Adds `value` as the first element.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] when the vector is full.
    pub fn prepend(&self, vm: &mut Vm<'_>, value: Value) -> VmResult<()> {
        self.insert_at(vm, 1, &[value])
    }

    /// Inserts `values` before a one-based position. Positions `<= 0` count
    /// from the end, so `0` appends.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] unless the position is in
    /// `1..=len + 1`.
    pub fn insert_at(&self, vm: &mut Vm<'_>, index: i32, values: &[Value]) -> VmResult<()> {
        let len = self.len(vm)?;
        let position = if index <= 0 {
            from_end(index, len)
        } else {
            i64::from(index)
        };
        let at = element_index(position, len + 1)?;

        let guard = vm.root(&[self.value()]);
        guard.keep_all(values);
        self.insert_elements_undo(vm, at, values.len())?;
        for (offset, value) in values.iter().enumerate() {
            let target = at + offset;
            if target < len {
                self.set_element_undo(vm, target, *value)?;
            } else {
                self.store(vm, target, *value)?;
            }
        }
        Ok(())
    }

    /// Deletes the element at a one-based index. Negative indices count from
    /// the end.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] outside the vector.
    pub fn remove_element_at(&self, vm: &mut Vm<'_>, index: i32) -> VmResult<()> {
        let len = self.len(vm)?;
        let at = element_index(normalize_negative(index, len), len)?;
        self.remove_elements_undo(vm, at, 1)
    }

    /// Deletes the elements from `start` to `end` inclusive. Negative
    /// indices count from the end.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] unless
    /// `1 <= start <= end <= len`.
    pub fn remove_range(&self, vm: &mut Vm<'_>, start: i32, end: i32) -> VmResult<()> {
        let len = self.len(vm)?;
        let start = element_index(normalize_negative(start, len), len)?;
        let end = element_index(normalize_negative(end, len), len)?;
        if end < start {
            return Err(VmError::IndexOutOfRange);
        }
        self.remove_elements_undo(vm, start, end - start + 1)
    }

    /// Deletes every element equal to `target`.
    ///
    /// # Errors
    ///
    /// Propagates equality errors.
    pub fn remove_element(&self, vm: &mut Vm<'_>, target: Value) -> VmResult<()> {
        let len = self.len(vm)?;
        let _guard = vm.root(&[self.value(), target]);
        let mut kept = 0;
        for index in 0..len {
            let element = self.element(vm, index)?;
            if !vm.values_equal(&element, &target, 0)? {
                if kept != index {
                    self.set_element_undo(vm, kept, element)?;
                }
                kept += 1;
            }
        }
        if kept == len {
            Ok(())
        } else {
            self.set_element_count_undo(vm, kept)
        }
    }

    /// Deletes `delete_count` elements at `start` and inserts `values` in
    /// their place.
    ///
    /// A `start <= 0` counts from the end. `delete_count` is clamped to the
    /// elements available.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] unless the start is in
    /// `1..=len + 1`.
    pub fn splice(
        &self,
        vm: &mut Vm<'_>,
        start: i32,
        delete_count: i32,
        values: &[Value],
    ) -> VmResult<()> {
        let len = self.len(vm)?;
        let start = if start <= 0 {
            from_end(start, len)
        } else {
            i64::from(start)
        };
        let at = element_index(start, len + 1)?;
        let deleted = clamp_count(i64::from(delete_count), len - at);
        let inserted = values.len();

        let guard = vm.root(&[self.value()]);
        guard.keep_all(values);
        if deleted > inserted {
            self.remove_elements_undo(vm, at + inserted, deleted - inserted)?;
        } else if deleted < inserted {
            self.insert_elements_undo(vm, at + deleted, inserted - deleted)?;
        }
        for (offset, value) in values.iter().enumerate() {
            let target = at + offset;
            if target < len {
                self.set_element_undo(vm, target, *value)?;
            } else {
                self.store(vm, target, *value)?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Uniqueness
    // -------------------------------------------------------------------------

    /// A new vector with only the first occurrence of each value.
    ///
    /// # Errors
    ///
    /// Propagates equality errors.
    pub fn get_unique(&self, vm: &mut Vm<'_>) -> VmResult<Self> {
        let values = self.values(vm)?;
        let capacity = values.len();
        let unique = algebra::uniquify(vm, &values)?;
        let _guard = vm.root(&[self.value()]);
        Self::with_values(vm, unique, capacity)
    }

    /// Appends the elements of `other` (or `other` itself, if it is not
    /// list-like), then removes repeated values in place.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] if the combined length is too
    /// long.
    pub fn append_unique(&self, vm: &mut Vm<'_>, other: Value) -> VmResult<()> {
        let additions = vm.sequence_values(&other)?.unwrap_or_else(|| vec![other]);
        let len = self.len(vm)?;
        let _guard = vm.root(&[self.value(), other]);
        self.expand_by(vm, additions.len())?;
        for (offset, addition) in additions.into_iter().enumerate() {
            self.set_element_undo(vm, len + offset, addition)?;
        }

        let values = self.values(vm)?;
        let unique = algebra::uniquify(vm, &values)?;
        for (index, value) in unique.iter().enumerate() {
            if values[index] != *value {
                self.set_element_undo(vm, index, *value)?;
            }
        }
        self.set_element_count_undo(vm, unique.len())
    }

    // -------------------------------------------------------------------------
    // Searching
    // -------------------------------------------------------------------------

    /// One-based index of the first element equal to `target`, or `nil`.
    ///
    /// # Errors
    ///
    /// Propagates equality errors.
    pub fn index_of(&self, vm: &Vm<'_>, target: &Value) -> VmResult<Value> {
        algebra::index_of(vm, &self.value(), target, Direction::Forward).map(algebra::index_value)
    }

    /// One-based index of the last element equal to `target`, or `nil`.
    ///
    /// # Errors
    ///
    /// Propagates equality errors.
    pub fn last_index_of(&self, vm: &Vm<'_>, target: &Value) -> VmResult<Value> {
        algebra::index_of(vm, &self.value(), target, Direction::Backward).map(algebra::index_value)
    }

    /// Number of elements equal to `target`.
    ///
    /// # Errors
    ///
    /// Propagates equality errors.
    pub fn count_of(&self, vm: &Vm<'_>, target: &Value) -> VmResult<usize> {
        algebra::count_of(vm, &self.value(), target)
    }

    /// One-based index of the first element accepted by `function`, or `nil`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn index_which(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<Value> {
        algebra::index_which(vm, &self.value(), function, Direction::Forward)
            .map(algebra::index_value)
    }

    /// One-based index of the last element accepted by `function`, or `nil`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn last_index_which(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<Value> {
        algebra::index_which(vm, &self.value(), function, Direction::Backward)
            .map(algebra::index_value)
    }

    /// The first element accepted by `function`, or `nil`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn val_which(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<Value> {
        algebra::val_which(vm, &self.value(), function, Direction::Forward)
    }

    /// The last element accepted by `function`, or `nil`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn last_val_which(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<Value> {
        algebra::val_which(vm, &self.value(), function, Direction::Backward)
    }

    /// Number of elements accepted by `function`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn count_which(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<usize> {
        algebra::count_which(vm, &self.value(), function)
    }

    // -------------------------------------------------------------------------
    // Callback transforms
    // -------------------------------------------------------------------------

    /// A new vector of the elements accepted by `function`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn subset(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<Self> {
        let guard = vm.root(&[]);
        let capacity = self.len(vm)?;
        let kept = algebra::subset(vm, &self.value(), function, &guard)?;
        Self::with_values(vm, kept, capacity)
    }

    /// A new vector of `function(x)` for every element `x`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn map_all(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<Self> {
        let guard = vm.root(&[]);
        let mapped = algebra::map(vm, &self.value(), function, &guard)?;
        let capacity = self.capacity(vm)?;
        Self::with_values(vm, mapped, capacity)
    }

    /// Calls `function(x)` for every element, re-reading the length each
    /// time.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn for_each(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<()> {
        algebra::for_each(vm, &self.value(), function, false)
    }

    /// Calls `function(index, x)` for every element.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn for_each_assoc(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<()> {
        algebra::for_each(vm, &self.value(), function, true)
    }

    /// One-based index of the smallest element (or smallest mapped value).
    ///
    /// # Errors
    ///
    /// Returns [`VmError::BadValue`] for an empty vector.
    pub fn index_of_min(&self, vm: &mut Vm<'_>, function: Option<Value>) -> VmResult<Value> {
        let (index, _) = algebra::min_max(vm, &self.value(), function, Extreme::Min)?;
        Ok(Value::from_count(index + 1))
    }

    /// The smallest element, or smallest mapped value.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::BadValue`] for an empty vector.
    pub fn min_val(&self, vm: &mut Vm<'_>, function: Option<Value>) -> VmResult<Value> {
        algebra::min_max(vm, &self.value(), function, Extreme::Min).map(|(_, value)| value)
    }

    /// One-based index of the largest element (or largest mapped value).
    ///
    /// # Errors
    ///
    /// Returns [`VmError::BadValue`] for an empty vector.
    pub fn index_of_max(&self, vm: &mut Vm<'_>, function: Option<Value>) -> VmResult<Value> {
        let (index, _) = algebra::min_max(vm, &self.value(), function, Extreme::Max)?;
        Ok(Value::from_count(index + 1))
    }

    /// The largest element, or largest mapped value.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::BadValue`] for an empty vector.
    pub fn max_val(&self, vm: &mut Vm<'_>, function: Option<Value>) -> VmResult<Value> {
        algebra::min_max(vm, &self.value(), function, Extreme::Max).map(|(_, value)| value)
    }

    // -------------------------------------------------------------------------
    // Strings and iteration
    // -------------------------------------------------------------------------

    /// Joins the elements' text into a new string value.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] for a non-string separator or an
    /// element with no string form.
    pub fn join(&self, vm: &mut Vm<'_>, separator: Option<Value>) -> VmResult<Value> {
        let text = algebra::join(vm, &self.value(), separator.as_ref())?;
        vm.new_string(text)
    }

    /// `toString` conversion: elements converted and joined with commas.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] for an element with no string form and
    /// [`VmError::TreeTooDeepForComparison`] for self-containing vectors.
    pub fn to_display_string(&self, vm: &Vm<'_>) -> VmResult<String> {
        vm.to_display_string(&self.value())
    }

    /// An iterator over a snapshot copy, unaffected by later changes.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::OutOfMemory`] if the heap is exhausted.
    pub fn new_iterator(&self, vm: &mut Vm<'_>) -> VmResult<IterRef> {
        let guard = vm.root(&[self.value()]);
        let copy = self.create_copy(vm)?;
        guard.keep(copy.value());
        let len = copy.len(vm)?;
        IterRef::create(vm, copy.value(), len)
    }

    /// An iterator over this vector itself. Its range is fixed at creation.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::OutOfMemory`] if the heap is exhausted.
    pub fn new_live_iterator(&self, vm: &mut Vm<'_>) -> VmResult<IterRef> {
        let len = self.len(vm)?;
        IterRef::create(vm, self.value(), len)
    }
}

// =============================================================================
// VectorSorter
// =============================================================================

/// Sorts a vector in place through the undo-aware setter.
#[derive(Debug, Clone, Copy)]
pub struct VectorSorter {
    vector: VectorRef,
    context: SortContext,
}

impl VectorSorter {
    /// Prepares to sort `vector`.
    #[must_use]
    pub const fn new(vector: VectorRef, context: SortContext) -> Self {
        Self { vector, context }
    }
}

impl<'a> Sortable<'a> for VectorSorter {
    fn len(&self, vm: &Vm<'a>) -> VmResult<usize> {
        self.vector.len(vm)
    }

    fn get(&self, vm: &Vm<'a>, index: usize) -> VmResult<Value> {
        self.vector.element(vm, index)
    }

    fn set(&mut self, vm: &mut Vm<'a>, index: usize, value: Value) -> VmResult<()> {
        self.vector.set_element_undo(vm, index, value)
    }

    fn context(&self) -> &SortContext {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::runtime::NativeInterpreter;
    use rstest::rstest;

    fn ints(values: &[i32]) -> Vec<Value> {
        values.iter().copied().map(Value::Int).collect()
    }

    fn vm() -> Vm<'static> {
        Vm::new(VmConfig::default()).unwrap()
    }

    fn vector(vm: &mut Vm<'_>, values: &[i32]) -> VectorRef {
        VectorRef::create_from_values(vm, &ints(values)).unwrap()
    }

    // =========================================================================
    // DirtyBits
    // =========================================================================

    #[rstest]
    fn test_dirty_bits_track_individual_slots() {
        let mut bits = DirtyBits::new(130);
        bits.insert(0);
        bits.insert(129);
        bits.insert(500);

        assert!(bits.contains(0));
        assert!(bits.contains(129));
        assert!(!bits.contains(64));
        assert!(!bits.contains(500));
        assert_eq!(bits.count(), 2);

        bits.clear();
        assert_eq!(bits.count(), 0);
        assert_eq!(bits.len(), 130);
    }

    // =========================================================================
    // Construction
    // =========================================================================

    #[rstest]
    fn test_construct_variants() {
        let mut vm = vm();
        let empty = VectorRef::construct(&mut vm, &[]).unwrap();
        assert_eq!(empty.len(&vm).unwrap(), 0);
        assert_eq!(empty.capacity(&vm).unwrap(), 10);

        let sized = VectorRef::construct(&mut vm, &[Value::Int(4)]).unwrap();
        assert_eq!(sized.len(&vm).unwrap(), 0);
        assert_eq!(sized.capacity(&vm).unwrap(), 4);

        let nils = VectorRef::construct(&mut vm, &[Value::Int(2), Value::Int(3)]).unwrap();
        assert_eq!(nils.values(&vm).unwrap(), vec![Value::Nil; 3]);

        let source = vector(&mut vm, &[1, 2]);
        let copied = VectorRef::construct(&mut vm, &[Value::Int(8), source.value()]).unwrap();
        assert_eq!(copied.values(&vm).unwrap(), ints(&[1, 2]));
        assert_eq!(copied.capacity(&vm).unwrap(), 8);

        assert!(matches!(
            VectorRef::construct(&mut vm, &[Value::True]),
            Err(VmError::WrongType { .. })
        ));
        assert!(matches!(
            VectorRef::construct(&mut vm, &[Value::Int(-1)]),
            Err(VmError::BadValue { .. })
        ));
    }

    #[rstest]
    fn test_create_copy_is_independent() {
        let mut vm = vm();
        let original = vector(&mut vm, &[1, 2]);
        let copy = original.create_copy(&mut vm).unwrap();
        copy.set(&mut vm, 1, Value::Int(9)).unwrap();
        assert_eq!(original.values(&vm).unwrap(), ints(&[1, 2]));
        assert_eq!(copy.values(&vm).unwrap(), ints(&[9, 2]));
    }

    // =========================================================================
    // Indexing and growth
    // =========================================================================

    #[rstest]
    fn test_get_requires_index_in_range() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1, 2]);
        assert_eq!(vector.get(&vm, 2).unwrap(), Value::Int(2));
        assert_eq!(vector.get(&vm, 0), Err(VmError::IndexOutOfRange));
        assert_eq!(vector.get(&vm, 3), Err(VmError::IndexOutOfRange));
        assert_eq!(vector.get(&vm, -1), Err(VmError::IndexOutOfRange));
    }

    #[rstest]
    fn test_set_past_end_extends_with_nil() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1]);
        vector.set(&mut vm, 4, Value::Int(4)).unwrap();
        assert_eq!(
            vector.values(&vm).unwrap(),
            vec![Value::Int(1), Value::Nil, Value::Nil, Value::Int(4)]
        );
        assert_eq!(vector.set(&mut vm, 0, Value::Nil), Err(VmError::IndexOutOfRange));
    }

    #[rstest]
    fn test_growth_uses_increment() {
        let mut vm = vm();
        let vector = VectorRef::create(&mut vm, 2).unwrap();
        for value in 0..3 {
            vector.append(&mut vm, Value::Int(value)).unwrap();
        }
        assert_eq!(vector.capacity(&vm).unwrap(), 18);
    }

    #[rstest]
    fn test_set_length_pads_and_truncates() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1, 2, 3]);
        vector.set_length(&mut vm, 5).unwrap();
        assert_eq!(
            vector.values(&vm).unwrap(),
            vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Nil, Value::Nil]
        );
        vector.set_length(&mut vm, 1).unwrap();
        assert_eq!(vector.values(&vm).unwrap(), ints(&[1]));
        assert!(matches!(vector.set_length(&mut vm, -1), Err(VmError::BadValue { .. })));
        assert!(matches!(
            vector.set_length(&mut vm, 65536),
            Err(VmError::SizeLimitExceeded { .. })
        ));
    }

    // =========================================================================
    // Undo
    // =========================================================================

    #[rstest]
    fn test_append_then_undo() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1, 2, 3]);
        vm.create_savepoint();
        vector.append(&mut vm, Value::Int(4)).unwrap();
        assert_eq!(vector.values(&vm).unwrap(), ints(&[1, 2, 3, 4]));

        assert!(vm.undo_to_savepoint());
        assert_eq!(vector.values(&vm).unwrap(), ints(&[1, 2, 3]));
    }

    #[rstest]
    fn test_one_record_per_slot_per_savepoint() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1, 2, 3]);
        vm.create_savepoint();
        vector.set(&mut vm, 1, Value::Int(10)).unwrap();
        vector.set(&mut vm, 1, Value::Int(20)).unwrap();
        assert_eq!(vm.undo().record_count(), 1);

        vm.undo_to_savepoint();
        assert_eq!(vector.values(&vm).unwrap(), ints(&[1, 2, 3]));
    }

    #[rstest]
    fn test_new_savepoint_journals_slots_again() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1]);
        vm.create_savepoint();
        vector.set(&mut vm, 1, Value::Int(2)).unwrap();
        vm.create_savepoint();
        vector.set(&mut vm, 1, Value::Int(3)).unwrap();

        vm.undo_to_savepoint();
        assert_eq!(vector.get(&vm, 1).unwrap(), Value::Int(2));
        vm.undo_to_savepoint();
        assert_eq!(vector.get(&vm, 1).unwrap(), Value::Int(1));
    }

    #[rstest]
    fn test_vectors_created_after_savepoint_are_not_journalled() {
        let mut vm = vm();
        vm.create_savepoint();
        let vector = vector(&mut vm, &[1]);
        vector.set(&mut vm, 1, Value::Int(2)).unwrap();
        assert_eq!(vm.undo().record_count(), 0);
    }

    #[rstest]
    #[case::remove_range(|vm: &mut Vm<'_>, v: VectorRef| v.remove_range(vm, 2, 3))]
    #[case::insert_at(|vm: &mut Vm<'_>, v: VectorRef| v.insert_at(vm, 2, &[Value::Int(7), Value::Int(8)]))]
    #[case::prepend(|vm: &mut Vm<'_>, v: VectorRef| v.prepend(vm, Value::Int(0)))]
    #[case::splice(|vm: &mut Vm<'_>, v: VectorRef| v.splice(vm, 2, 1, &[Value::Int(9), Value::Int(9), Value::Int(9)]))]
    #[case::sort(|vm: &mut Vm<'_>, v: VectorRef| v.sort(vm, true, None))]
    #[case::fill(|vm: &mut Vm<'_>, v: VectorRef| v.fill_val(vm, Value::Nil, Some(3), Some(5)))]
    #[case::remove_element(|vm: &mut Vm<'_>, v: VectorRef| v.remove_element(vm, Value::Int(2)))]
    #[case::append_unique(|vm: &mut Vm<'_>, v: VectorRef| v.append_unique(vm, Value::Int(1)))]
    #[case::set_length(|vm: &mut Vm<'_>, v: VectorRef| v.set_length(vm, 40))]
    fn test_mutation_is_undone(#[case] mutate: fn(&mut Vm<'_>, VectorRef) -> VmResult<()>) {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1, 2, 3, 2, 5]);
        vm.create_savepoint();
        mutate(&mut vm, vector).unwrap();
        vm.undo_to_savepoint();
        assert_eq!(vector.values(&vm).unwrap(), ints(&[1, 2, 3, 2, 5]));
    }

    #[rstest]
    fn test_length_record_never_reallocates() {
        let mut vector = Vector::from_values(ints(&[1, 2]));
        let id = ObjectId::from_raw(1);

        vector.apply_undo(&UndoRecord::length(id, 1));
        assert_eq!(vector.as_slice(), ints(&[1]).as_slice());

        vector.apply_undo(&UndoRecord::length(id, 9));
        assert_eq!(vector.len(), 1);
        assert_eq!(vector.capacity(), 2);
    }

    #[rstest]
    fn test_exhausted_journal_aborts_the_mutation() {
        let config = VmConfig::default().with_undo_record_capacity(2);
        let mut vm = Vm::new(config).unwrap();
        let vector = vector(&mut vm, &[1, 2, 3]);
        vm.create_savepoint();
        vector.set(&mut vm, 1, Value::Int(10)).unwrap();
        vector.set(&mut vm, 2, Value::Int(20)).unwrap();

        assert_eq!(
            vector.set(&mut vm, 3, Value::Int(30)),
            Err(VmError::UndoJournalExhausted)
        );
        assert_eq!(vector.get(&vm, 3).unwrap(), Value::Int(3));
        assert_eq!(vm.undo().savepoint_count(), 0);
    }

    // =========================================================================
    // Scenarios
    // =========================================================================

    #[rstest]
    fn test_sort_ascending_then_descending() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[5, 3, 1, 4]);
        vector.sort(&mut vm, false, None).unwrap();
        assert_eq!(vector.values(&vm).unwrap(), ints(&[1, 3, 4, 5]));
        vector.sort(&mut vm, true, None).unwrap();
        assert_eq!(vector.values(&vm).unwrap(), ints(&[5, 4, 3, 1]));
    }

    #[rstest]
    fn test_remove_element_at() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[10, 20, 30]);
        vector.remove_element_at(&mut vm, 2).unwrap();
        assert_eq!(vector.values(&vm).unwrap(), ints(&[10, 30]));
        assert_eq!(vector.remove_element_at(&mut vm, 3), Err(VmError::IndexOutOfRange));
    }

    #[rstest]
    fn test_get_unique_leaves_original() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1, 2, 2, 3, 1]);
        let unique = vector.get_unique(&mut vm).unwrap();
        assert_eq!(unique.values(&vm).unwrap(), ints(&[1, 2, 3]));
        assert_eq!(vector.len(&vm).unwrap(), 5);
    }

    #[rstest]
    fn test_append_unique_in_place() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1, 2, 2]);
        let other = vector_of(&mut vm, &[3, 1, 4]);
        vector.append_unique(&mut vm, other).unwrap();
        assert_eq!(vector.values(&vm).unwrap(), ints(&[1, 2, 3, 4]));
    }

    fn vector_of(vm: &mut Vm<'_>, values: &[i32]) -> Value {
        vector(vm, values).value()
    }

    // =========================================================================
    // Insertion, removal and splicing
    // =========================================================================

    #[rstest]
    #[case(1, &[7, 8, 1, 2, 3])]
    #[case(0, &[1, 2, 3, 7, 8])]
    #[case(-1, &[1, 2, 7, 8, 3])]
    fn test_insert_at(#[case] index: i32, #[case] expected: &[i32]) {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1, 2, 3]);
        vector.insert_at(&mut vm, index, &ints(&[7, 8])).unwrap();
        assert_eq!(vector.values(&vm).unwrap(), ints(expected));
    }

    #[rstest]
    #[case(2, 1, &[9], &[1, 9, 3])]
    #[case(2, 5, &[], &[1])]
    #[case(0, 0, &[4, 5], &[1, 2, 3, 4, 5])]
    #[case(1, 1, &[7, 8, 9], &[7, 8, 9, 2, 3])]
    fn test_splice(
        #[case] start: i32,
        #[case] delete: i32,
        #[case] insert: &[i32],
        #[case] expected: &[i32],
    ) {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1, 2, 3]);
        vector.splice(&mut vm, start, delete, &ints(insert)).unwrap();
        assert_eq!(vector.values(&vm).unwrap(), ints(expected));
    }

    #[rstest]
    fn test_splice_rejects_start_past_end() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1, 2, 3]);
        assert_eq!(vector.splice(&mut vm, 5, 0, &[]), Err(VmError::IndexOutOfRange));
    }

    #[rstest]
    fn test_remove_range_and_remove_element() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1, 2, 3, 2, 5]);
        vector.remove_element(&mut vm, Value::Int(2)).unwrap();
        assert_eq!(vector.values(&vm).unwrap(), ints(&[1, 3, 5]));
        vector.remove_range(&mut vm, -2, -1).unwrap();
        assert_eq!(vector.values(&vm).unwrap(), ints(&[1]));
        assert_eq!(vector.remove_range(&mut vm, 1, 2), Err(VmError::IndexOutOfRange));
    }

    #[rstest]
    fn test_append_all_flattens_one_level() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1]);
        let more = vector_of(&mut vm, &[2, 3]);
        vector.append_all(&mut vm, more).unwrap();
        vector.append_all(&mut vm, Value::Int(4)).unwrap();
        vector.append(&mut vm, more).unwrap();
        assert_eq!(
            vector.values(&vm).unwrap(),
            vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4), more]
        );
    }

    // =========================================================================
    // Bulk updates and conversion
    // =========================================================================

    #[rstest]
    #[case(None, None, &[1, 2, 3, 4])]
    #[case(Some(2), Some(2), &[2, 3])]
    #[case(Some(-2), None, &[3, 4])]
    #[case(Some(-9), Some(1), &[1])]
    #[case(Some(3), Some(-1), &[])]
    #[case(Some(9), None, &[])]
    fn test_to_list(#[case] start: Option<i32>, #[case] count: Option<i32>, #[case] expected: &[i32]) {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1, 2, 3, 4]);
        let list = vector.to_list(&mut vm, start, count).unwrap();
        assert_eq!(list.values(&vm).unwrap(), ints(expected));
    }

    #[rstest]
    fn test_copy_from_grows_the_vector() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1, 2]);
        let source = ListRef::create(&mut vm, &ints(&[7, 8, 9])).unwrap();
        vector.copy_from(&mut vm, source.value(), 2, 2, 5).unwrap();
        assert_eq!(vector.values(&vm).unwrap(), ints(&[1, 8, 9]));
        assert!(vector.copy_from(&mut vm, Value::Int(1), 1, 1, 1).is_err());
    }

    #[rstest]
    fn test_fill_val() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1, 2, 3]);
        vector.fill_val(&mut vm, Value::Int(0), Some(2), None).unwrap();
        assert_eq!(vector.values(&vm).unwrap(), ints(&[1, 0, 0]));
        vector.fill_val(&mut vm, Value::Int(5), Some(-1), Some(2)).unwrap();
        assert_eq!(vector.values(&vm).unwrap(), ints(&[1, 0, 5, 5]));
    }

    #[rstest]
    fn test_add_and_sub_return_new_vectors() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1, 2, 3]);
        let sum = vector.add(&mut vm, Value::Int(4)).unwrap();
        let difference = sum.sub(&mut vm, vector.value()).unwrap();
        assert_eq!(sum.values(&vm).unwrap(), ints(&[1, 2, 3, 4]));
        assert_eq!(difference.values(&vm).unwrap(), ints(&[4]));
        assert_eq!(vector.len(&vm).unwrap(), 3);
    }

    #[rstest]
    fn test_callbacks() {
        let mut natives = NativeInterpreter::new();
        let double = natives.register(|_, arguments| Ok(Value::Int(arguments[0].expect_int()? * 2)));
        let is_odd = natives.register(|_, arguments| Ok(Value::Int(arguments[0].expect_int()? % 2)));
        let mut vm = Vm::new(VmConfig::default()).unwrap().with_interpreter(natives);
        let vector = vector(&mut vm, &[1, 2, 3]);

        let odd = vector.subset(&mut vm, is_odd).unwrap();
        assert_eq!(odd.values(&vm).unwrap(), ints(&[1, 3]));
        let doubled = vector.map_all(&mut vm, double).unwrap();
        assert_eq!(doubled.values(&vm).unwrap(), ints(&[2, 4, 6]));
        assert_eq!(vector.count_which(&mut vm, is_odd).unwrap(), 2);
        assert_eq!(vector.last_index_which(&mut vm, is_odd).unwrap(), Value::Int(3));

        vm.create_savepoint();
        vector.apply_all(&mut vm, double).unwrap();
        assert_eq!(vector.values(&vm).unwrap(), ints(&[2, 4, 6]));
        vm.undo_to_savepoint();
        assert_eq!(vector.values(&vm).unwrap(), ints(&[1, 2, 3]));
    }

    #[rstest]
    fn test_self_reference_equals_itself_but_cannot_hash() {
        let mut vm = vm();
        let vector = vector(&mut vm, &[1]);
        vector.append(&mut vm, vector.value()).unwrap();
        assert!(vector.equals(&vm, &vector.value(), 0).unwrap());
        assert_eq!(
            vector.calc_hash(&vm, 0),
            Err(VmError::TreeTooDeepForComparison)
        );
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    #[rstest]
    fn test_save_and_restore_keep_allocation() {
        let mut vm = vm();
        let vector = VectorRef::create(&mut vm, 6).unwrap();
        vector.append(&mut vm, Value::Int(1)).unwrap();
        let bytes = vector.save(&vm).unwrap();
        assert_eq!(&bytes[..4], &[6, 0, 1, 0]);

        let restored = VectorRef::restore(&mut vm, &bytes).unwrap();
        assert_eq!(restored.values(&vm).unwrap(), ints(&[1]));
        assert_eq!(restored.capacity(&vm).unwrap(), 6);
        assert!(VectorRef::restore(&mut vm, &bytes[..bytes.len() - 1]).is_err());
    }

    #[rstest]
    fn test_load_from_image_is_tolerant() {
        let mut vm = vm();
        let bytes = [1u8, 0, 2, 0, 7, 5, 0, 0, 0];
        let vector = VectorRef::load_from_image(&mut vm, &bytes).unwrap();
        assert_eq!(vector.values(&vm).unwrap(), vec![Value::Int(5), Value::Nil]);
        assert_eq!(vector.capacity(&vm).unwrap(), 2);
    }

    // =========================================================================
    // Garbage collection
    // =========================================================================

    #[rstest]
    fn test_growth_survives_collection_on_every_allocation() {
        let mut vm = Vm::new(VmConfig::default().with_gc_interval(1).with_memory_limit(Some(4096)))
            .unwrap();
        let vector = VectorRef::create(&mut vm, 0).unwrap();
        vm.add_global_root(vector.value());
        for index in 0..40 {
            let text = vm.new_string(format!("item {index}")).unwrap();
            vector.append(&mut vm, text).unwrap();
        }
        let last = vector.get(&vm, 40).unwrap();
        assert_eq!(vm.string_of(&last).unwrap(), Some("item 39"));
    }
}
