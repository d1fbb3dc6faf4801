//! The runtime context every collection operation runs against.
//!
//! [`Vm`] ties together the heap, the root stack, the undo journal, the
//! constant pool and the interpreter, and implements the value semantics
//! (equality, hashing, ordering, string conversion) that collections rely
//! on.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use rustc_hash::FxHasher;
use tracing::debug;

use crate::collection::{List, Sequence, SlotView, Vector};
use crate::config::VmConfig;
use crate::error::{VmError, VmResult};
use crate::runtime::heap::undo_roots;
use crate::runtime::{
    ConstantPool, GcStats, Heap, Interpreter, NativeInterpreter, Object, ObjectId, RootGuard,
    RootStack, UndoJournal, UndoRecord, Value,
};

// =============================================================================
// SeqRef
// =============================================================================

/// A borrowed view of any sequence-like value.
#[derive(Debug, Clone, Copy)]
pub enum SeqRef<'s, 'a> {
    /// A list object.
    List(&'s List<'a>),
    /// A vector object.
    Vector(&'s Vector),
    /// A constant list in the program image.
    Constant(SlotView<'a>),
}

impl SeqRef<'_, '_> {
    /// Returns `true` for vectors, the only sequences that can contain
    /// themselves.
    #[inline]
    #[must_use]
    pub const fn is_vector(&self) -> bool {
        matches!(self, Self::Vector(_))
    }
}

impl Sequence for SeqRef<'_, '_> {
    fn len(&self) -> usize {
        match self {
            Self::List(list) => list.len(),
            Self::Vector(vector) => vector.len(),
            Self::Constant(view) => view.len(),
        }
    }

    fn get(&self, index: usize) -> VmResult<Value> {
        match self {
            Self::List(list) => list.get(index),
            Self::Vector(vector) => vector.get(index),
            Self::Constant(view) => view.get(index),
        }
    }
}

// =============================================================================
// Vm
// =============================================================================

/// Runtime state shared by all collections.
///
/// The lifetime `'a` is that of the program-image bytes, which constant
/// lists and image-loaded lists borrow without copying.
pub struct Vm<'a> {
    config: VmConfig,
    heap: Heap<'a>,
    undo: UndoJournal,
    roots: RootStack,
    globals: Vec<Value>,
    constants: ConstantPool<'a>,
    interpreter: Rc<dyn Interpreter>,
}

impl<'a> Vm<'a> {
    /// Creates a runtime with an empty heap and no callable functions.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::BadValue`] if `config` fails validation.
    pub fn new(config: VmConfig) -> VmResult<Self> {
        config.validate()?;
        let undo = UndoJournal::new(config.undo_record_capacity, config.max_savepoints);
        Ok(Self {
            config,
            heap: Heap::new(),
            undo,
            roots: RootStack::default(),
            globals: Vec::new(),
            constants: ConstantPool::default(),
            interpreter: Rc::new(NativeInterpreter::new()),
        })
    }

    /// Replaces the interpreter used for callbacks.
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Interpreter + 'static) -> Self {
        self.interpreter = Rc::new(interpreter);
        self
    }

    /// Attaches the program image's constant pool.
    #[must_use]
    pub const fn with_constants(mut self, bytes: &'a [u8]) -> Self {
        self.constants = ConstantPool::new(bytes);
        self
    }

    /// The active configuration.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &VmConfig {
        &self.config
    }

    /// The object heap.
    #[inline]
    #[must_use]
    pub const fn heap(&self) -> &Heap<'a> {
        &self.heap
    }

    /// The undo journal.
    #[inline]
    #[must_use]
    pub const fn undo(&self) -> &UndoJournal {
        &self.undo
    }

    /// The constant pool.
    #[inline]
    #[must_use]
    pub const fn constants(&self) -> ConstantPool<'a> {
        self.constants
    }

    /// The explicit root stack.
    #[inline]
    #[must_use]
    pub const fn roots(&self) -> &RootStack {
        &self.roots
    }

    pub(crate) const fn heap_mut(&mut self) -> &mut Heap<'a> {
        &mut self.heap
    }

    pub(crate) const fn parts_mut(&mut self) -> (&mut Heap<'a>, &mut UndoJournal) {
        (&mut self.heap, &mut self.undo)
    }

    // -------------------------------------------------------------------------
    // Rooting and allocation
    // -------------------------------------------------------------------------

    /// Roots `values` until the returned guard is dropped.
    pub fn root(&self, values: &[Value]) -> RootGuard {
        let guard = self.roots.guard();
        guard.keep_all(values);
        guard
    }

    /// Roots `value` until [`Vm::remove_global_root`] is called for it.
    pub fn add_global_root(&mut self, value: Value) {
        self.globals.push(value);
    }

    /// Removes one occurrence of `value` from the global roots.
    pub fn remove_global_root(&mut self, value: Value) -> bool {
        self.globals
            .iter()
            .position(|root| *root == value)
            .map(|position| self.globals.swap_remove(position))
            .is_some()
    }

    /// Stores `object` in the heap, collecting first if the allocation
    /// interval has elapsed or the memory limit would be exceeded.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::OutOfMemory`] if the object does not fit even after
    /// a collection.
    pub fn allocate(&mut self, object: Object<'a>) -> VmResult<ObjectId> {
        self.reserve(object.footprint())?;
        Ok(self.heap.insert(object))
    }

    /// Makes room for `bytes` more heap bytes, collecting if needed.
    pub(crate) fn reserve(&mut self, bytes: usize) -> VmResult<()> {
        if bytes > self.config.max_block_size {
            return Err(VmError::OutOfMemory { requested: bytes });
        }
        let interval = self.config.gc_interval;
        if interval > 0 && self.heap.allocations_since_collect() >= interval {
            self.collect_garbage();
        }
        if let Some(limit) = self.config.memory_limit
            && self.heap.bytes_in_use() + bytes > limit
        {
            debug!(requested = bytes, limit, "memory limit reached; collecting");
            self.collect_garbage();
            if self.heap.bytes_in_use() + bytes > limit {
                return Err(VmError::OutOfMemory { requested: bytes });
            }
        }
        Ok(())
    }

    /// Runs a full collection.
    ///
    /// Roots are the explicit root stack, the global roots and every object
    /// captured as an old value in a pending undo record. Undo records
    /// whose owner was reclaimed are dropped afterward.
    pub fn collect_garbage(&mut self) -> GcStats {
        let mut roots = self.roots.snapshot();
        roots.extend_from_slice(&self.globals);
        roots.extend(undo_roots(self.undo.records()));
        let stats = self.heap.collect(roots);
        let heap = &self.heap;
        self.undo.retain_owners(|owner| heap.contains(owner));
        stats
    }

    /// Allocates a run-time string.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::OutOfMemory`] if the heap is exhausted.
    pub fn new_string(&mut self, text: impl Into<String>) -> VmResult<Value> {
        let id = self.allocate(Object::String(text.into()))?;
        Ok(Value::Obj(id))
    }

    // -------------------------------------------------------------------------
    // Undo
    // -------------------------------------------------------------------------

    /// Starts a new savepoint. Every existing object joins the undo scope
    /// and forgets which slots it already journalled.
    pub fn create_savepoint(&mut self) {
        self.undo.create_savepoint();
        self.heap.notify_new_savepoint();
    }

    /// Rolls every journalled change back to the most recent savepoint and
    /// discards it. Returns `false` if there was no savepoint.
    pub fn undo_to_savepoint(&mut self) -> bool {
        let Some(records) = self.undo.pop_savepoint() else {
            return false;
        };
        for record in &records {
            self.heap.apply_undo(record);
        }
        self.heap.notify_new_savepoint();
        true
    }

    /// Discards all savepoints and records.
    pub fn drop_undo(&mut self) {
        self.undo.drop_undo();
    }

    /// Whether changes to `owner` must be journalled right now.
    pub(crate) fn journaling(&self, owner: ObjectId) -> VmResult<bool> {
        Ok(self.undo.is_active() && self.heap.in_undo(owner)?)
    }

    pub(crate) fn add_undo_record(&mut self, record: UndoRecord) -> VmResult<()> {
        self.undo.add_record(record)
    }

    // -------------------------------------------------------------------------
    // Callbacks
    // -------------------------------------------------------------------------

    /// Calls a function value through the interpreter.
    ///
    /// # Errors
    ///
    /// Propagates any error raised by the callee.
    pub fn invoke(&mut self, function: Value, arguments: &[Value]) -> VmResult<Value> {
        let interpreter = Rc::clone(&self.interpreter);
        interpreter.call(self, function, arguments)
    }

    /// Fails unless `function` can be invoked.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] for values that are not callable.
    pub fn require_callable(&self, function: &Value) -> VmResult<()> {
        if self.interpreter.is_callable(function) {
            Ok(())
        } else {
            Err(VmError::wrong_type("function"))
        }
    }

    // -------------------------------------------------------------------------
    // Sequence access
    // -------------------------------------------------------------------------

    /// Resolves `value` to a sequence, or `None` if it is not list-like.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidObject`] for a dangling reference and
    /// [`VmError::InvalidData`] for a bad constant offset.
    pub fn sequence(&self, value: &Value) -> VmResult<Option<SeqRef<'_, 'a>>> {
        match value {
            Value::List(offset) => Ok(Some(SeqRef::Constant(self.constants.list_at(*offset)?))),
            Value::Obj(id) => Ok(match self.heap.get(*id)? {
                Object::List(list) => Some(SeqRef::List(list)),
                Object::Vector(vector) => Some(SeqRef::Vector(vector)),
                Object::Iterator(_) | Object::String(_) => None,
            }),
            _ => Ok(None),
        }
    }

    /// Returns `true` if `value` is list-like.
    #[must_use]
    pub fn is_sequence(&self, value: &Value) -> bool {
        matches!(self.sequence(value), Ok(Some(_)))
    }

    /// Current length of a list-like value.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] if `value` is not list-like.
    pub fn sequence_len(&self, value: &Value) -> VmResult<usize> {
        self.sequence(value)?
            .map(|sequence| sequence.len())
            .ok_or(VmError::wrong_type("list-like value"))
    }

    /// Element at a zero-based index of a list-like value.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] if `value` is not list-like and
    /// [`VmError::IndexOutOfRange`] past the end.
    pub fn sequence_get(&self, value: &Value, index: usize) -> VmResult<Value> {
        self.sequence(value)?
            .ok_or(VmError::wrong_type("list-like value"))?
            .get(index)
    }

    /// Copies the elements of a list-like value, or `None` for anything else.
    ///
    /// # Errors
    ///
    /// Propagates resolution and decode errors.
    pub fn sequence_values(&self, value: &Value) -> VmResult<Option<Vec<Value>>> {
        self.sequence(value)?
            .map(|sequence| sequence.to_values())
            .transpose()
    }

    /// The text of a string value (constant or run-time), if it is one.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors.
    pub fn string_of(&self, value: &Value) -> VmResult<Option<&str>> {
        match value {
            Value::SString(offset) => Ok(Some(self.constants.string_at(*offset)?)),
            Value::Obj(id) => match self.heap.get(*id)? {
                Object::String(text) => Ok(Some(text.as_str())),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    // -------------------------------------------------------------------------
    // Value semantics
    // -------------------------------------------------------------------------

    /// Semantic equality.
    ///
    /// Identical values are equal. Sequences compare by length and then
    /// element-wise against any list-like right-hand side; strings compare
    /// by content. Each level of vector nesting increases `depth`, and
    /// recursion past [`VmConfig::max_comparison_depth`] fails.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::TreeTooDeepForComparison`] when a vector cycle is
    /// compared against a structurally identical but distinct cycle.
    pub fn values_equal(&self, left: &Value, right: &Value, depth: usize) -> VmResult<bool> {
        if left == right {
            return Ok(true);
        }
        if let Some(sequence) = self.sequence(left)? {
            let depth = self.nested_depth(&sequence, depth)?;
            let Some(other) = self.sequence(right)? else {
                return Ok(false);
            };
            if sequence.len() != other.len() {
                return Ok(false);
            }
            for index in 0..sequence.len() {
                if !self.values_equal(&sequence.get(index)?, &other.get(index)?, depth)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        match (self.string_of(left)?, self.string_of(right)?) {
            (Some(left), Some(right)) => Ok(left == right),
            _ => Ok(false),
        }
    }

    /// Hash consistent with [`Vm::values_equal`].
    ///
    /// A sequence hashes to the wrapping sum of its element hashes.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::TreeTooDeepForComparison`] for self-containing
    /// vectors.
    pub fn calc_hash(&self, value: &Value, depth: usize) -> VmResult<u32> {
        if let Some(sequence) = self.sequence(value)? {
            let depth = self.nested_depth(&sequence, depth)?;
            let mut hash = 0u32;
            for index in 0..sequence.len() {
                hash = hash.wrapping_add(self.calc_hash(&sequence.get(index)?, depth)?);
            }
            return Ok(hash);
        }
        if let Some(text) = self.string_of(value)? {
            let mut hasher = FxHasher::default();
            text.hash(&mut hasher);
            #[allow(clippy::cast_possible_truncation)]
            return Ok(hasher.finish() as u32);
        }
        let slot = value.to_slot();
        Ok(u32::from_le_bytes([slot[1], slot[2], slot[3], slot[4]]))
    }

    /// Default ordering: integers numerically, strings by content.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidComparison`] for any other pairing.
    pub fn compare(&self, left: &Value, right: &Value) -> VmResult<Ordering> {
        if let (Value::Int(left), Value::Int(right)) = (left, right) {
            return Ok(left.cmp(right));
        }
        match (self.string_of(left)?, self.string_of(right)?) {
            (Some(left), Some(right)) => Ok(left.cmp(right)),
            _ => Err(VmError::InvalidComparison),
        }
    }

    /// Explicit string conversion.
    ///
    /// `nil` and `true` spell their names, integers are decimal, strings are
    /// themselves, and sequences convert each element and join them with
    /// commas.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::WrongType`] for values with no string form and
    /// [`VmError::TreeTooDeepForComparison`] for self-containing vectors.
    pub fn to_display_string(&self, value: &Value) -> VmResult<String> {
        self.display_at(value, 0)
    }

    fn display_at(&self, value: &Value, depth: usize) -> VmResult<String> {
        match value {
            Value::Nil => return Ok("nil".to_owned()),
            Value::True => return Ok("true".to_owned()),
            Value::Int(number) => return Ok(number.to_string()),
            _ => {}
        }
        if let Some(text) = self.string_of(value)? {
            return Ok(text.to_owned());
        }
        if let Some(sequence) = self.sequence(value)? {
            let depth = self.nested_depth(&sequence, depth)?;
            let mut parts = Vec::with_capacity(sequence.len());
            for index in 0..sequence.len() {
                parts.push(self.display_at(&sequence.get(index)?, depth)?);
            }
            return Ok(parts.join(","));
        }
        Err(VmError::wrong_type("value convertible to string"))
    }

    fn nested_depth(&self, sequence: &SeqRef<'_, 'a>, depth: usize) -> VmResult<usize> {
        if !sequence.is_vector() {
            return Ok(depth);
        }
        if depth > self.config.max_comparison_depth {
            return Err(VmError::TreeTooDeepForComparison);
        }
        Ok(depth + 1)
    }
}

impl fmt::Debug for Vm<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Vm")
            .field("config", &self.config)
            .field("live_objects", &self.heap.live_count())
            .field("bytes_in_use", &self.heap.bytes_in_use())
            .field("savepoints", &self.undo.savepoint_count())
            .field("root_depth", &self.roots.depth())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{ListRef, VectorRef};
    use crate::runtime::ConstantPoolBuilder;
    use rstest::rstest;

    fn vm() -> Vm<'static> {
        Vm::new(VmConfig::default()).unwrap()
    }

    fn ints(values: &[i32]) -> Vec<Value> {
        values.iter().copied().map(Value::Int).collect()
    }

    // =========================================================================
    // Equality and hashing
    // =========================================================================

    #[rstest]
    fn test_list_equals_vector_with_same_elements() {
        let mut vm = vm();
        let list = ListRef::create(&mut vm, &ints(&[1, 2, 3])).unwrap();
        let vector = VectorRef::create_from_values(&mut vm, &ints(&[1, 2, 3])).unwrap();

        assert!(vm.values_equal(&list.value(), &vector.value(), 0).unwrap());
        assert!(vm.values_equal(&vector.value(), &list.value(), 0).unwrap());
        assert_eq!(
            vm.calc_hash(&list.value(), 0).unwrap(),
            vm.calc_hash(&vector.value(), 0).unwrap()
        );
    }

    #[rstest]
    fn test_sequence_is_not_equal_to_scalar() {
        let mut vm = vm();
        let list = ListRef::create(&mut vm, &ints(&[1])).unwrap();
        assert!(!vm.values_equal(&list.value(), &Value::Int(1), 0).unwrap());
        assert!(!vm.values_equal(&Value::Int(1), &list.value(), 0).unwrap());
    }

    #[rstest]
    fn test_strings_compare_by_content() {
        let mut builder = ConstantPoolBuilder::new();
        let constant = builder.add_string("abc");
        let bytes = builder.finish();
        let mut vm = Vm::new(VmConfig::default()).unwrap().with_constants(&bytes);
        let dynamic = vm.new_string("abc").unwrap();

        assert!(vm.values_equal(&constant, &dynamic, 0).unwrap());
        assert_eq!(vm.calc_hash(&constant, 0).unwrap(), vm.calc_hash(&dynamic, 0).unwrap());
        assert_eq!(vm.compare(&constant, &dynamic).unwrap(), Ordering::Equal);
    }

    #[rstest]
    fn test_self_containing_vector_equals_itself() {
        let mut vm = vm();
        let vector = VectorRef::create(&mut vm, 1).unwrap();
        vector.append(&mut vm, vector.value()).unwrap();
        assert!(vm.values_equal(&vector.value(), &vector.value(), 0).unwrap());
    }

    #[rstest]
    fn test_distinct_vector_cycles_are_too_deep() {
        let mut vm = vm();
        let first = VectorRef::create(&mut vm, 1).unwrap();
        let second = VectorRef::create(&mut vm, 1).unwrap();
        first.append(&mut vm, first.value()).unwrap();
        second.append(&mut vm, second.value()).unwrap();

        assert_eq!(
            vm.values_equal(&first.value(), &second.value(), 0),
            Err(VmError::TreeTooDeepForComparison)
        );
        assert_eq!(
            vm.calc_hash(&first.value(), 0),
            Err(VmError::TreeTooDeepForComparison)
        );
    }

    // =========================================================================
    // Ordering and conversion
    // =========================================================================

    #[rstest]
    #[case(Value::Int(1), Value::Int(2), Ordering::Less)]
    #[case(Value::Int(5), Value::Int(5), Ordering::Equal)]
    #[case(Value::Int(-1), Value::Int(-9), Ordering::Greater)]
    fn test_compare_integers(#[case] left: Value, #[case] right: Value, #[case] expected: Ordering) {
        assert_eq!(vm().compare(&left, &right).unwrap(), expected);
    }

    #[rstest]
    #[case(Value::Nil, Value::Int(1))]
    #[case(Value::True, Value::True)]
    fn test_compare_rejects_unordered(#[case] left: Value, #[case] right: Value) {
        assert_eq!(vm().compare(&left, &right), Err(VmError::InvalidComparison));
    }

    #[rstest]
    fn test_display_string_of_nested_list() {
        let mut vm = vm();
        let inner = ListRef::create(&mut vm, &[Value::Nil, Value::True]).unwrap();
        let outer = ListRef::create(&mut vm, &[Value::Int(1), inner.value()]).unwrap();
        assert_eq!(vm.to_display_string(&outer.value()).unwrap(), "1,nil,true");
    }

    // =========================================================================
    // Allocation and collection
    // =========================================================================

    #[rstest]
    fn test_global_roots_survive_collection() {
        let mut vm = vm();
        let kept = vm.new_string("kept").unwrap();
        let lost = vm.new_string("lost").unwrap();
        vm.add_global_root(kept);

        vm.collect_garbage();

        assert!(vm.string_of(&kept).unwrap().is_some());
        assert!(matches!(vm.string_of(&lost), Err(VmError::InvalidObject(_))));
        assert!(vm.remove_global_root(kept));
        assert!(!vm.remove_global_root(kept));
    }

    #[rstest]
    fn test_root_guard_protects_during_collection() {
        let mut vm = vm();
        let text = vm.new_string("temporary").unwrap();
        {
            let _guard = vm.root(&[text]);
            vm.collect_garbage();
            assert!(vm.string_of(&text).unwrap().is_some());
        }
        vm.collect_garbage();
        assert!(vm.string_of(&text).is_err());
    }

    #[rstest]
    fn test_memory_limit_collects_before_failing() {
        let config = VmConfig::default().with_memory_limit(Some(16));
        let mut vm = Vm::new(config).unwrap();
        vm.new_string("0123456789").unwrap();
        // The first string is garbage, so the second fits after a collection.
        vm.new_string("0123456789").unwrap();
        assert_eq!(vm.heap().stats().collections, 1);

        let pinned = vm.new_string("abc").unwrap();
        vm.add_global_root(pinned);
        let result = vm.new_string("0123456789");
        assert_eq!(result, Err(VmError::OutOfMemory { requested: 12 }));
    }

    #[rstest]
    fn test_gc_interval_triggers_collection() {
        let config = VmConfig::default().with_gc_interval(2);
        let mut vm = Vm::new(config).unwrap();
        for _ in 0..5 {
            vm.new_string("x").unwrap();
        }
        assert!(vm.heap().stats().collections >= 2);
    }

    #[rstest]
    fn test_undo_records_keep_old_values_alive() {
        let mut vm = vm();
        let vector = VectorRef::create(&mut vm, 2).unwrap();
        vm.add_global_root(vector.value());
        let text = vm.new_string("old").unwrap();
        vector.append(&mut vm, text).unwrap();

        vm.create_savepoint();
        vector.set(&mut vm, 1, Value::Int(0)).unwrap();
        vm.collect_garbage();
        assert!(vm.string_of(&text).unwrap().is_some());

        assert!(vm.undo_to_savepoint());
        assert_eq!(vector.get(&vm, 1).unwrap(), text);
    }

    #[rstest]
    fn test_undo_records_for_reclaimed_owners_are_dropped() {
        let mut vm = vm();
        let vector = VectorRef::create_from_values(&mut vm, &ints(&[1])).unwrap();
        vm.create_savepoint();
        vector.set(&mut vm, 1, Value::Int(2)).unwrap();
        assert_eq!(vm.undo().record_count(), 1);

        vm.collect_garbage();

        assert_eq!(vm.undo().record_count(), 0);
        assert!(vm.undo_to_savepoint());
    }
}
