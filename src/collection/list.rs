//! Immutable lists.
//!
//! A [`List`] is fully populated when it is created and never changes
//! afterward. Every operation that "modifies" a list builds a new one.
//! Storage is either owned or borrowed straight from program-image bytes.
//!
//! [`ListRef`] is the handle user-level operations go through. It accepts
//! both list objects on the heap and constant lists from the constant pool.

use crate::collection::algebra::{self, Direction, Extreme};
use crate::collection::sort::{self, SortContext, ValueSorter};
use crate::collection::{IterRef, Layout, PackedSequence, Sequence, SlotView};
use crate::error::{VmError, VmResult};
use crate::runtime::{Object, Trace, Tracer, Value, Vm};

// =============================================================================
// User index conventions
// =============================================================================

pub(crate) fn signed(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

/// `index + len + 1`: a negative user index counted from the end.
pub(crate) fn from_end(index: i32, len: usize) -> i64 {
    i64::from(index) + signed(len) + 1
}

/// Converts a one-based index into `1..=len` to a zero-based one.
pub(crate) fn element_index(index: i64, len: usize) -> VmResult<usize> {
    if index < 1 || index > signed(len) {
        return Err(VmError::IndexOutOfRange);
    }
    usize::try_from(index - 1).map_err(|_| VmError::IndexOutOfRange)
}

/// Negative indices count from the end; others are taken as given.
pub(crate) fn normalize_negative(index: i32, len: usize) -> i64 {
    if index < 0 {
        from_end(index, len)
    } else {
        i64::from(index)
    }
}

/// Zero-based position of a one-based index, with anything below 1 forced
/// to the first element.
pub(crate) fn forced_start(index: i64) -> usize {
    usize::try_from(index.max(1) - 1).unwrap_or(0)
}

/// Clamps a signed count into `0..=maximum`.
pub(crate) fn clamp_count(count: i64, maximum: usize) -> usize {
    usize::try_from(count.clamp(0, signed(maximum))).unwrap_or(0)
}

// =============================================================================
// List
// =============================================================================

/// Where a list's slots live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListStorage<'a> {
    /// Slots owned by the list.
    Owned(PackedSequence),
    /// Slots read in place from program-image bytes.
    Borrowed(SlotView<'a>),
}

/// An immutable sequence of values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct List<'a> {
    storage: ListStorage<'a>,
}

impl<'a> List<'a> {
    /// Creates an owned list holding `values`.
    #[must_use]
    pub fn from_values(values: Vec<Value>) -> Self {
        Self::owned(PackedSequence::from_values(values))
    }

    /// Creates an owned list over an existing slot array.
    #[must_use]
    pub const fn owned(sequence: PackedSequence) -> Self {
        Self {
            storage: ListStorage::Owned(sequence),
        }
    }

    /// Creates a list that aliases image bytes.
    #[must_use]
    pub const fn borrowed(view: SlotView<'a>) -> Self {
        Self {
            storage: ListStorage::Borrowed(view),
        }
    }

    /// The backing storage.
    #[inline]
    #[must_use]
    pub const fn storage(&self) -> &ListStorage<'a> {
        &self.storage
    }

    /// Returns `true` if the slots alias image bytes.
    #[inline]
    #[must_use]
    pub const fn is_borrowed(&self) -> bool {
        matches!(self.storage, ListStorage::Borrowed(_))
    }

    /// Heap bytes charged for this list. Borrowed slots cost nothing.
    #[must_use]
    pub const fn footprint(&self) -> usize {
        match &self.storage {
            ListStorage::Owned(sequence) => Layout::List.capacity_bytes(sequence.allocated()),
            ListStorage::Borrowed(_) => Layout::List.header_size(),
        }
    }

    /// Serializes in the list layout.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] if a borrowed slot cannot be decoded.
    pub fn save(&self) -> VmResult<Vec<u8>> {
        match &self.storage {
            ListStorage::Owned(sequence) => sequence.encode(Layout::List),
            ListStorage::Borrowed(view) => {
                PackedSequence::from_values(view.to_values()?).encode(Layout::List)
            }
        }
    }

    /// Rebuilds an owned list from saved bytes, which must hold every
    /// declared slot.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] for truncated or malformed bytes.
    pub fn restore(bytes: &[u8]) -> VmResult<Self> {
        SlotView::new(bytes)?;
        Ok(Self::owned(PackedSequence::decode(bytes, Layout::List)?))
    }

    /// Loads a list from program-image bytes.
    ///
    /// When the bytes cover every declared slot the list aliases them.
    /// Otherwise the available slots are copied and the rest are `nil`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] if even the length prefix is missing
    /// or a present slot is malformed.
    pub fn load_from_image(bytes: &'a [u8]) -> VmResult<Self> {
        match SlotView::new(bytes) {
            Ok(view) => Ok(Self::borrowed(view)),
            Err(_) => Ok(Self::owned(PackedSequence::decode(bytes, Layout::List)?)),
        }
    }
}

impl Sequence for List<'_> {
    fn len(&self) -> usize {
        match &self.storage {
            ListStorage::Owned(sequence) => sequence.len(),
            ListStorage::Borrowed(view) => view.len(),
        }
    }

    fn get(&self, index: usize) -> VmResult<Value> {
        match &self.storage {
            ListStorage::Owned(sequence) => Sequence::get(sequence, index),
            ListStorage::Borrowed(view) => view.get(index),
        }
    }
}

impl Trace for List<'_> {
    fn mark_refs(&self, tracer: &mut Tracer) {
        match &self.storage {
            ListStorage::Owned(sequence) => tracer.mark_all(sequence.as_slice()),
            ListStorage::Borrowed(view) => {
                for value in (0..view.len()).filter_map(|index| view.get(index).ok()) {
                    tracer.mark(&value);
                }
            }
        }
    }
}

// =============================================================================
// ListRef
// =============================================================================

/// Handle to a list-valued [`Value`]: a list object or a constant list.
///
/// Indices taken and returned by handle methods are one-based.
///
/// # Examples
///
/// ```rust
/// use t3vm_collections::VmConfig;
/// use t3vm_collections::collection::ListRef;
/// use t3vm_collections::runtime::{Value, Vm};
///
/// let mut vm = Vm::new(VmConfig::default())?;
/// let list = ListRef::create(&mut vm, &[Value::Int(1), Value::Int(2), Value::Int(3)])?;
/// let tail = list.add(&mut vm, Value::Int(4))?;
///
/// assert_eq!(list.len(&vm)?, 3);
/// assert_eq!(tail.len(&vm)?, 4);
/// assert_eq!(tail.get(&vm, 4)?, Value::Int(4));
/// # Ok::<(), t3vm_collections::VmError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListRef {
    value: Value,
}

impl ListRef {
    /// Wraps a list value.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] if `value` is neither a list object nor
    /// a constant list.
    pub fn new(vm: &Vm<'_>, value: Value) -> VmResult<Self> {
        let is_list = match value {
            Value::List(offset) => vm.constants().list_at(offset).is_ok(),
            Value::Obj(id) => vm.heap().list(id).is_ok(),
            _ => false,
        };
        if is_list {
            Ok(Self { value })
        } else {
            Err(VmError::wrong_type("list"))
        }
    }

    /// The wrapped value.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> Value {
        self.value
    }

    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Creates a list holding `values`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] for more than 65535 elements
    /// and [`VmError::OutOfMemory`] if the heap is exhausted.
    pub fn create(vm: &mut Vm<'_>, values: &[Value]) -> VmResult<Self> {
        Self::from_values(vm, values.to_vec())
    }

    /// Creates a list of `count` nils.
    ///
    /// # Errors
    ///
    /// See [`ListRef::create`].
    pub fn create_filled(vm: &mut Vm<'_>, count: usize) -> VmResult<Self> {
        Self::from_values(vm, vec![Value::Nil; count])
    }

    /// Creates a list holding a copy of any list-like value's elements.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] if `source` is not list-like.
    pub fn from_sequence(vm: &mut Vm<'_>, source: &Value) -> VmResult<Self> {
        let values = vm
            .sequence_values(source)?
            .ok_or(VmError::wrong_type("list-like value"))?;
        Self::from_values(vm, values)
    }

    /// Loads a list object from program-image bytes, aliasing them when
    /// they are complete.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] for malformed bytes.
    pub fn load_from_image<'a>(vm: &mut Vm<'a>, bytes: &'a [u8]) -> VmResult<Self> {
        let list = List::load_from_image(bytes)?;
        Self::allocate(vm, list)
    }

    /// Recreates a list object from [`ListRef::save`] output.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidData`] for truncated or malformed bytes.
    pub fn restore(vm: &mut Vm<'_>, bytes: &[u8]) -> VmResult<Self> {
        let list = List::restore(bytes)?;
        Self::allocate(vm, list)
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
        Self::from_values(vm, values)
    }

    pub(crate) fn from_values(vm: &mut Vm<'_>, values: Vec<Value>) -> VmResult<Self> {
        let allocated = values.len();
        Self::with_allocation(vm, values, allocated)
    }

    /// Builds a list whose allocation is the operation's worst case and
    /// whose element count is what the operation actually produced.
    fn with_allocation(vm: &mut Vm<'_>, values: Vec<Value>, allocated: usize) -> VmResult<Self> {
        let allocated = allocated.max(values.len());
        Layout::List.check_capacity(allocated, vm.config().max_block_size)?;
        let mut sequence = PackedSequence::with_allocated(allocated);
        for value in values {
            sequence.push(value)?;
        }
        Self::allocate(vm, List::owned(sequence))
    }

    fn allocate<'a>(vm: &mut Vm<'a>, list: List<'a>) -> VmResult<Self> {
        let id = vm.allocate(Object::List(list))?;
        Ok(Self {
            value: Value::Obj(id),
        })
    }

    // -------------------------------------------------------------------------
    // Access
    // -------------------------------------------------------------------------

    /// Number of elements.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidObject`] if the list was reclaimed.
    pub fn len(&self, vm: &Vm<'_>) -> VmResult<usize> {
        vm.sequence_len(&self.value)
    }

    /// Returns `true` for an empty list.
    ///
    /// # Errors
    ///
    /// See [`ListRef::len`].
    pub fn is_empty(&self, vm: &Vm<'_>) -> VmResult<bool> {
        Ok(self.len(vm)? == 0)
    }

    /// Element at a one-based index in `1..=len`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] outside the list.
    pub fn get(&self, vm: &Vm<'_>, index: i32) -> VmResult<Value> {
        let len = self.len(vm)?;
        vm.sequence_get(&self.value, element_index(i64::from(index), len)?)
    }

    /// Copies every element out.
    ///
    /// # Errors
    ///
    /// See [`ListRef::len`].
    pub fn values(&self, vm: &Vm<'_>) -> VmResult<Vec<Value>> {
        vm.sequence_values(&self.value)?
            .ok_or(VmError::wrong_type("list"))
    }

    /// Serializes the list.
    ///
    /// # Errors
    ///
    /// See [`ListRef::len`].
    pub fn save(&self, vm: &Vm<'_>) -> VmResult<Vec<u8>> {
        PackedSequence::from_values(self.values(vm)?).encode(Layout::List)
    }

    /// The first element, or `nil` for an empty list.
    ///
    /// # Errors
    ///
    /// See [`ListRef::len`].
    pub fn car(&self, vm: &Vm<'_>) -> VmResult<Value> {
        if self.is_empty(vm)? {
            Ok(Value::Nil)
        } else {
            vm.sequence_get(&self.value, 0)
        }
    }

    /// Everything after the first element, or `None` for an empty list.
    ///
    /// # Errors
    ///
    /// See [`ListRef::len`].
    pub fn cdr(&self, vm: &mut Vm<'_>) -> VmResult<Option<Self>> {
        let values = self.values(vm)?;
        match values.split_first() {
            None => Ok(None),
            Some((_, rest)) => {
                let _guard = vm.root(&[self.value]);
                Self::from_values(vm, rest.to_vec()).map(Some)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Equality and arithmetic
    // -------------------------------------------------------------------------

    /// Element-wise equality against any list-like value.
    ///
    /// # Errors
    ///
    /// Propagates [`VmError::TreeTooDeepForComparison`] from nested vectors.
    pub fn equals(&self, vm: &Vm<'_>, other: &Value, depth: usize) -> VmResult<bool> {
        vm.values_equal(&self.value, other, depth)
    }

    /// Hash consistent with [`ListRef::equals`].
    ///
    /// # Errors
    ///
    /// Propagates [`VmError::TreeTooDeepForComparison`] from nested vectors.
    pub fn calc_hash(&self, vm: &Vm<'_>, depth: usize) -> VmResult<u32> {
        vm.calc_hash(&self.value, depth)
    }

    /// `self + rhs`: a new list with `rhs` (or its elements, if it is
    /// list-like) appended.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] if the result is too long.
    pub fn add(&self, vm: &mut Vm<'_>, rhs: Value) -> VmResult<Self> {
        let _guard = vm.root(&[self.value, rhs]);
        let values = algebra::concat(vm, &self.value, &rhs)?;
        Self::from_values(vm, values)
    }

    /// `self - rhs`: a new list without the elements equal to `rhs` (or to
    /// any of its elements, if it is list-like).
    ///
    /// # Errors
    ///
    /// Propagates equality errors.
    pub fn sub(&self, vm: &mut Vm<'_>, rhs: Value) -> VmResult<Self> {
        let _guard = vm.root(&[self.value, rhs]);
        let values = algebra::difference(vm, &self.value, &rhs)?;
        let worst_case = self.len(vm)?;
        Self::with_allocation(vm, values, worst_case)
    }

    /// A new list with the element at a one-based index replaced.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] unless `index` is in `1..=len`.
    pub fn set(&self, vm: &mut Vm<'_>, index: i32, value: Value) -> VmResult<Self> {
        let mut values = self.values(vm)?;
        let position = element_index(i64::from(index), values.len())?;
        values[position] = value;
        let _guard = vm.root(&[self.value, value]);
        Self::from_values(vm, values)
    }

    /// Elements of the shorter of `self` and `other` that occur in both.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] if `other` is not list-like.
    pub fn intersect(&self, vm: &mut Vm<'_>, other: Value) -> VmResult<Self> {
        let _guard = vm.root(&[self.value, other]);
        let values = algebra::intersect(vm, &self.value, &other)?;
        let worst_case = values.len();
        Self::with_allocation(vm, values, worst_case)
    }

    // -------------------------------------------------------------------------
    // Slicing and rearranging
    // -------------------------------------------------------------------------

    /// Elements from `start` onward, at most `length` of them.
    ///
    /// A negative `start` counts from the end; a start outside the list
    /// gives an empty list. A negative `length` drops that many elements
    /// from the end of the selection.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::OutOfMemory`] if the heap is exhausted.
    pub fn sublist(&self, vm: &mut Vm<'_>, start: i32, length: Option<i32>) -> VmResult<Self> {
        let values = self.values(vm)?;
        let len = values.len();
        let start = normalize_negative(start, len);
        let (skip, mut count) = if start >= 1 && start <= signed(len) {
            (start - 1, signed(len) - (start - 1))
        } else {
            (0, 0)
        };
        match length.map(i64::from) {
            Some(length) if length < 0 => count += length,
            Some(length) => count = count.min(length),
            None => {}
        }
        let skip = clamp_count(skip, len);
        let count = clamp_count(count, len - skip);
        let _guard = vm.root(&[self.value]);
        Self::from_values(vm, values[skip..skip + count].to_vec())
    }

    /// A new list with `values` inserted before a one-based position.
    ///
    /// Positions `<= 0` count from the end, so `0` appends. Inserted values
    /// are never flattened.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] unless the position is in
    /// `1..=len + 1`.
    pub fn insert_at(&self, vm: &mut Vm<'_>, index: i32, values: &[Value]) -> VmResult<Self> {
        let mut elements = self.values(vm)?;
        let len = elements.len();
        let position = if index <= 0 {
            from_end(index, len)
        } else {
            i64::from(index)
        };
        let at = element_index(position, len + 1)?;
        elements.splice(at..at, values.iter().copied());
        let guard = vm.root(&[self.value]);
        guard.keep_all(values);
        Self::from_values(vm, elements)
    }

    /// A new list with `value` as an extra last element.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] if the result is too long.
    pub fn append(&self, vm: &mut Vm<'_>, value: Value) -> VmResult<Self> {
        self.insert_at(vm, 0, &[value])
    }

    /// A new list with `value` as an extra first element.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] if the result is too long.
    pub fn prepend(&self, vm: &mut Vm<'_>, value: Value) -> VmResult<Self> {
        self.insert_at(vm, 1, &[value])
    }

    /// A new list without the element at a one-based index. Negative
    /// indices count from the end.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] outside the list.
    pub fn remove_element_at(&self, vm: &mut Vm<'_>, index: i32) -> VmResult<Self> {
        self.remove_range(vm, index, index)
    }

    /// A new list without the elements from `start` to `end` inclusive.
    /// Negative indices count from the end.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] unless
    /// `1 <= start <= end <= len`.
    pub fn remove_range(&self, vm: &mut Vm<'_>, start: i32, end: i32) -> VmResult<Self> {
        let mut values = self.values(vm)?;
        let len = values.len();
        let start = element_index(normalize_negative(start, len), len)?;
        let end = element_index(normalize_negative(end, len), len)?;
        if end < start {
            return Err(VmError::IndexOutOfRange);
        }
        values.drain(start..=end);
        let _guard = vm.root(&[self.value]);
        Self::from_values(vm, values)
    }

    /// Deletes `delete_count` elements at `start` and inserts `values` in
    /// their place.
    ///
    /// A `start <= 0` counts from the end; the result is clamped into the
    /// list rather than rejected, and `delete_count` is clamped to the
    /// elements available. When nothing is deleted or inserted the
    /// original list is returned.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::SizeLimitExceeded`] if the result is too long.
    pub fn splice(
        &self,
        vm: &mut Vm<'_>,
        start: i32,
        delete_count: i32,
        values: &[Value],
    ) -> VmResult<Self> {
        let mut elements = self.values(vm)?;
        let len = elements.len();
        let start = if start <= 0 {
            from_end(start, len)
        } else {
            i64::from(start)
        };
        let at = clamp_count(start - 1, len);
        let deleted = clamp_count(i64::from(delete_count), len - at);
        if deleted == 0 && values.is_empty() {
            return Ok(*self);
        }
        elements.splice(at..at + deleted, values.iter().copied());
        let guard = vm.root(&[self.value]);
        guard.keep_all(values);
        Self::from_values(vm, elements)
    }

    /// A sorted copy.
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
    ) -> VmResult<Self> {
        let values = self.values(vm)?;
        let guard = vm.root(&[self.value]);
        guard.keep_all(&values);
        let context = SortContext::new(descending, comparator);
        if let Some(function) = context.callback() {
            guard.keep(function);
        }
        let mut sorter = ValueSorter::new(values, context);
        sort::sort(vm, &mut sorter)?;
        Self::from_values(vm, sorter.into_values())
    }

    /// A copy with only the first occurrence of each value.
    ///
    /// # Errors
    ///
    /// Propagates equality errors.
    pub fn get_unique(&self, vm: &mut Vm<'_>) -> VmResult<Self> {
        let values = self.values(vm)?;
        let worst_case = values.len();
        let unique = algebra::uniquify(vm, &values)?;
        let _guard = vm.root(&[self.value]);
        Self::with_allocation(vm, unique, worst_case)
    }

    /// `self` followed by the elements of `other`, with duplicates removed.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] if `other` is not list-like.
    pub fn append_unique(&self, vm: &mut Vm<'_>, other: Value) -> VmResult<Self> {
        let mut values = self.values(vm)?;
        let extra = vm
            .sequence_values(&other)?
            .ok_or(VmError::wrong_type("list-like value"))?;
        values.extend(extra);
        let worst_case = values.len();
        Layout::List.check_capacity(worst_case, vm.config().max_block_size)?;
        let unique = algebra::uniquify(vm, &values)?;
        let _guard = vm.root(&[self.value, other]);
        Self::with_allocation(vm, unique, worst_case)
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
        algebra::index_of(vm, &self.value, target, Direction::Forward).map(algebra::index_value)
    }

    /// One-based index of the last element equal to `target`, or `nil`.
    ///
    /// # Errors
    ///
    /// Propagates equality errors.
    pub fn last_index_of(&self, vm: &Vm<'_>, target: &Value) -> VmResult<Value> {
        algebra::index_of(vm, &self.value, target, Direction::Backward).map(algebra::index_value)
    }

    /// Number of elements equal to `target`.
    ///
    /// # Errors
    ///
    /// Propagates equality errors.
    pub fn count_of(&self, vm: &Vm<'_>, target: &Value) -> VmResult<usize> {
        algebra::count_of(vm, &self.value, target)
    }

    /// One-based index of the first element accepted by `function`, or `nil`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn index_which(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<Value> {
        algebra::index_which(vm, &self.value, function, Direction::Forward)
            .map(algebra::index_value)
    }

    /// One-based index of the last element accepted by `function`, or `nil`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn last_index_which(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<Value> {
        algebra::index_which(vm, &self.value, function, Direction::Backward)
            .map(algebra::index_value)
    }

    /// The first element accepted by `function`, or `nil`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn val_which(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<Value> {
        algebra::val_which(vm, &self.value, function, Direction::Forward)
    }

    /// The last element accepted by `function`, or `nil`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn last_val_which(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<Value> {
        algebra::val_which(vm, &self.value, function, Direction::Backward)
    }

    /// Number of elements accepted by `function`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn count_which(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<usize> {
        algebra::count_which(vm, &self.value, function)
    }

    // -------------------------------------------------------------------------
    // Callback transforms
    // -------------------------------------------------------------------------

    /// The elements accepted by `function`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn subset(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<Self> {
        let guard = vm.root(&[]);
        let worst_case = self.len(vm)?;
        let kept = algebra::subset(vm, &self.value, function, &guard)?;
        Self::with_allocation(vm, kept, worst_case)
    }

    /// `function(x)` for every element `x`.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn map_all(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<Self> {
        let guard = vm.root(&[]);
        let mapped = algebra::map(vm, &self.value, function, &guard)?;
        Self::from_values(vm, mapped)
    }

    /// Calls `function(x)` for every element.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn for_each(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<()> {
        algebra::for_each(vm, &self.value, function, false)
    }

    /// Calls `function(index, x)` for every element.
    ///
    /// # Errors
    ///
    /// Propagates callback errors.
    pub fn for_each_assoc(&self, vm: &mut Vm<'_>, function: Value) -> VmResult<()> {
        algebra::for_each(vm, &self.value, function, true)
    }

    /// One-based index of the smallest element (or smallest mapped value).
    ///
    /// # Errors
    ///
    /// Returns [`VmError::BadValue`] for an empty list.
    pub fn index_of_min(&self, vm: &mut Vm<'_>, function: Option<Value>) -> VmResult<Value> {
        let (index, _) = algebra::min_max(vm, &self.value, function, Extreme::Min)?;
        Ok(Value::from_count(index + 1))
    }

    /// The smallest element, or the smallest mapped value when `function` is
    /// given.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::BadValue`] for an empty list.
    pub fn min_val(&self, vm: &mut Vm<'_>, function: Option<Value>) -> VmResult<Value> {
        algebra::min_max(vm, &self.value, function, Extreme::Min).map(|(_, value)| value)
    }

    /// One-based index of the largest element (or largest mapped value).
    ///
    /// # Errors
    ///
    /// Returns [`VmError::BadValue`] for an empty list.
    pub fn index_of_max(&self, vm: &mut Vm<'_>, function: Option<Value>) -> VmResult<Value> {
        let (index, _) = algebra::min_max(vm, &self.value, function, Extreme::Max)?;
        Ok(Value::from_count(index + 1))
    }

    /// The largest element, or the largest mapped value when `function` is
    /// given.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::BadValue`] for an empty list.
    pub fn max_val(&self, vm: &mut Vm<'_>, function: Option<Value>) -> VmResult<Value> {
        algebra::min_max(vm, &self.value, function, Extreme::Max).map(|(_, value)| value)
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
        let text = algebra::join(vm, &self.value, separator.as_ref())?;
        vm.new_string(text)
    }

    /// `toString` conversion: each element converted, joined with commas.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] for an element with no string form.
    pub fn to_display_string(&self, vm: &Vm<'_>) -> VmResult<String> {
        vm.to_display_string(&self.value)
    }

    /// An iterator over indices `1..=len`. Lists never change, so the list
    /// itself serves as the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::OutOfMemory`] if the heap is exhausted.
    pub fn new_iterator(&self, vm: &mut Vm<'_>) -> VmResult<IterRef> {
        let len = self.len(vm)?;
        IterRef::create(vm, self.value, len)
    }
}
