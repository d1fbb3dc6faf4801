//! Object arena, explicit root stack, and mark-and-sweep collection.
//!
//! Every list, vector, iterator and string lives in the [`Heap`] and is
//! addressed by an [`ObjectId`]. Reachability starts from the explicit root
//! stack, the global roots and the values captured in pending undo records.
//! Anything not reached is reclaimed, and its id is reused by later
//! allocations.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::collection::{IndexIterator, List, Vector};
use crate::error::{VmError, VmResult};
use crate::runtime::{ObjectId, UndoRecord, Value};

// =============================================================================
// Object
// =============================================================================

/// Everything the heap can hold.
#[derive(Debug, Clone)]
pub enum Object<'a> {
    /// An immutable list.
    List(List<'a>),
    /// A mutable vector.
    Vector(Vector),
    /// An index iterator over a list or vector.
    Iterator(IndexIterator),
    /// A string created at run time.
    String(String),
}

impl Object<'_> {
    /// Short name of the object's kind, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::List(_) => "list",
            Self::Vector(_) => "vector",
            Self::Iterator(_) => "iterator",
            Self::String(_) => "string",
        }
    }

    /// Bytes charged against the heap for this object.
    #[must_use]
    pub fn footprint(&self) -> usize {
        match self {
            Self::List(list) => list.footprint(),
            Self::Vector(vector) => vector.footprint(),
            Self::Iterator(_) => IndexIterator::FOOTPRINT,
            Self::String(text) => text.len() + 2,
        }
    }

    fn mark_refs(&self, tracer: &mut Tracer) {
        match self {
            Self::List(list) => list.mark_refs(tracer),
            Self::Vector(vector) => vector.mark_refs(tracer),
            Self::Iterator(iterator) => iterator.mark_refs(tracer),
            Self::String(_) => {}
        }
    }

    fn apply_undo(&mut self, record: &UndoRecord) {
        match self {
            Self::Vector(vector) => vector.apply_undo(record),
            Self::Iterator(iterator) => iterator.apply_undo(record),
            Self::List(_) | Self::String(_) => {}
        }
    }

    fn notify_new_savepoint(&mut self) {
        match self {
            Self::Vector(vector) => vector.notify_new_savepoint(),
            Self::Iterator(iterator) => iterator.notify_new_savepoint(),
            Self::List(_) | Self::String(_) => {}
        }
    }
}

// =============================================================================
// Tracer
// =============================================================================

/// Work list handed to `mark_refs` implementations.
#[derive(Debug, Default)]
pub struct Tracer {
    pending: Vec<ObjectId>,
}

impl Tracer {
    /// Reports `value` as reachable if it references an object.
    #[inline]
    pub fn mark(&mut self, value: &Value) {
        if let Value::Obj(id) = value {
            self.pending.push(*id);
        }
    }

    /// Reports every object referenced from `values`.
    pub fn mark_all<'v>(&mut self, values: impl IntoIterator<Item = &'v Value>) {
        for value in values {
            self.mark(value);
        }
    }
}

/// Implemented by objects that hold references to other objects.
pub trait Trace {
    /// Reports every object this value keeps alive.
    fn mark_refs(&self, tracer: &mut Tracer);
}

// =============================================================================
// Root stack
// =============================================================================

/// The explicit keep-alive stack.
///
/// Cloning yields another handle to the same stack. Values are pushed
/// through a [`RootGuard`], which pops them again when dropped.
#[derive(Debug, Clone, Default)]
pub struct RootStack {
    values: Rc<RefCell<Vec<Value>>>,
}

impl RootStack {
    /// Opens a guard; values kept through it stay rooted until it drops.
    #[must_use]
    pub fn guard(&self) -> RootGuard {
        let base = self.values.borrow().len();
        RootGuard {
            stack: Rc::clone(&self.values),
            base,
        }
    }

    /// Number of values currently rooted.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.values.borrow().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Value> {
        self.values.borrow().clone()
    }
}

/// RAII token over a region of the [`RootStack`].
///
/// # Examples
///
/// ```rust
/// use t3vm_collections::runtime::{RootStack, Value};
///
/// let stack = RootStack::default();
/// {
///     let guard = stack.guard();
///     guard.keep(Value::Int(1));
///     guard.keep(Value::Int(2));
///     assert_eq!(stack.depth(), 2);
/// }
/// assert_eq!(stack.depth(), 0);
/// ```
#[derive(Debug)]
#[must_use = "values are unrooted as soon as the guard is dropped"]
pub struct RootGuard {
    stack: Rc<RefCell<Vec<Value>>>,
    base: usize,
}

impl RootGuard {
    /// Roots `value` for the guard's lifetime.
    pub fn keep(&self, value: Value) {
        self.stack.borrow_mut().push(value);
    }

    /// Roots every value in `values`.
    pub fn keep_all(&self, values: &[Value]) {
        self.stack.borrow_mut().extend_from_slice(values);
    }
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        self.stack.borrow_mut().truncate(self.base);
    }
}

// =============================================================================
// Heap
// =============================================================================

/// Counters from the most recent collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcStats {
    /// Completed collections since the heap was created.
    pub collections: usize,
    /// Objects that survived the last collection.
    pub live: usize,
    /// Objects reclaimed by the last collection.
    pub reclaimed: usize,
    /// Bytes released by the last collection.
    pub bytes_reclaimed: usize,
}

#[derive(Debug, Clone)]
struct Entry<'a> {
    object: Object<'a>,
    footprint: usize,
    marked: bool,
    /// Set once a savepoint has been created since the object was born.
    /// Objects outside undo never need records.
    in_undo: bool,
}

/// Arena of runtime objects.
#[derive(Debug, Clone, Default)]
pub struct Heap<'a> {
    entries: Vec<Option<Entry<'a>>>,
    free: Vec<usize>,
    bytes_in_use: usize,
    allocations_since_collect: usize,
    stats: GcStats,
}

impl<'a> Heap<'a> {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently charged to live objects.
    #[inline]
    #[must_use]
    pub const fn bytes_in_use(&self) -> usize {
        self.bytes_in_use
    }

    /// Allocations since the last collection.
    #[inline]
    #[must_use]
    pub const fn allocations_since_collect(&self) -> usize {
        self.allocations_since_collect
    }

    /// Statistics from the last collection.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> GcStats {
        self.stats
    }

    /// Number of live objects.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    /// Returns `true` if `id` names a live object.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.entry(id).is_ok()
    }

    /// Stores `object` and returns its id. Limits are the caller's concern.
    pub fn insert(&mut self, object: Object<'a>) -> ObjectId {
        let footprint = object.footprint();
        let entry = Entry {
            object,
            footprint,
            marked: false,
            in_undo: false,
        };
        self.bytes_in_use += footprint;
        self.allocations_since_collect += 1;
        if let Some(index) = self.free.pop() {
            self.entries[index] = Some(entry);
            ObjectId::from_index(index)
        } else {
            self.entries.push(Some(entry));
            ObjectId::from_index(self.entries.len() - 1)
        }
    }

    /// Re-reads the footprint of `id` after it grew or shrank.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidObject`] for a dead id.
    pub fn refresh_footprint(&mut self, id: ObjectId) -> VmResult<()> {
        let entry = self.entry_mut(id)?;
        let footprint = entry.object.footprint();
        let previous = std::mem::replace(&mut entry.footprint, footprint);
        self.bytes_in_use = self.bytes_in_use - previous + footprint;
        Ok(())
    }

    /// Whether changes to `id` must be journalled.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidObject`] for a dead id.
    pub fn in_undo(&self, id: ObjectId) -> VmResult<bool> {
        Ok(self.entry(id)?.in_undo)
    }

    /// Borrows an object.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidObject`] for a dead id.
    pub fn get(&self, id: ObjectId) -> VmResult<&Object<'a>> {
        Ok(&self.entry(id)?.object)
    }

    /// Mutably borrows an object.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidObject`] for a dead id.
    pub fn get_mut(&mut self, id: ObjectId) -> VmResult<&mut Object<'a>> {
        Ok(&mut self.entry_mut(id)?.object)
    }

    /// Borrows a list.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidObject`] if `id` is dead or not a list.
    pub fn list(&self, id: ObjectId) -> VmResult<&List<'a>> {
        match self.get(id)? {
            Object::List(list) => Ok(list),
            _ => Err(VmError::InvalidObject(id)),
        }
    }

    /// Borrows a vector.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidObject`] if `id` is dead or not a vector.
    pub fn vector(&self, id: ObjectId) -> VmResult<&Vector> {
        match self.get(id)? {
            Object::Vector(vector) => Ok(vector),
            _ => Err(VmError::InvalidObject(id)),
        }
    }

    /// Mutably borrows a vector.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidObject`] if `id` is dead or not a vector.
    pub fn vector_mut(&mut self, id: ObjectId) -> VmResult<&mut Vector> {
        match self.get_mut(id)? {
            Object::Vector(vector) => Ok(vector),
            _ => Err(VmError::InvalidObject(id)),
        }
    }

    /// Borrows an iterator.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidObject`] if `id` is dead or not an iterator.
    pub fn iterator(&self, id: ObjectId) -> VmResult<&IndexIterator> {
        match self.get(id)? {
            Object::Iterator(iterator) => Ok(iterator),
            _ => Err(VmError::InvalidObject(id)),
        }
    }

    /// Mutably borrows an iterator.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidObject`] if `id` is dead or not an iterator.
    pub fn iterator_mut(&mut self, id: ObjectId) -> VmResult<&mut IndexIterator> {
        match self.get_mut(id)? {
            Object::Iterator(iterator) => Ok(iterator),
            _ => Err(VmError::InvalidObject(id)),
        }
    }

    /// Borrows a run-time string.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidObject`] if `id` is dead or not a string.
    pub fn string(&self, id: ObjectId) -> VmResult<&str> {
        match self.get(id)? {
            Object::String(text) => Ok(text),
            _ => Err(VmError::InvalidObject(id)),
        }
    }

    /// Replays one undo record against its owner. Records for reclaimed
    /// owners are ignored.
    pub fn apply_undo(&mut self, record: &UndoRecord) {
        if let Ok(entry) = self.entry_mut(record.owner) {
            entry.object.apply_undo(record);
        }
    }

    /// Tells every object that a different savepoint is now current.
    pub fn notify_new_savepoint(&mut self) {
        for entry in self.entries.iter_mut().flatten() {
            entry.in_undo = true;
            entry.object.notify_new_savepoint();
        }
    }

    /// Marks everything reachable from `roots`, then reclaims the rest.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Value>) -> GcStats {
        let mut tracer = Tracer::default();
        for root in roots {
            tracer.mark(&root);
        }

        while let Some(id) = tracer.pending.pop() {
            let Some(entry) = id
                .index()
                .and_then(|index| self.entries.get_mut(index))
                .and_then(Option::as_mut)
            else {
                continue;
            };
            if entry.marked {
                continue;
            }
            entry.marked = true;
            entry.object.mark_refs(&mut tracer);
        }

        let mut stats = GcStats {
            collections: self.stats.collections + 1,
            ..GcStats::default()
        };
        for (index, slot) in self.entries.iter_mut().enumerate() {
            match slot {
                Some(entry) if entry.marked => {
                    entry.marked = false;
                    stats.live += 1;
                }
                Some(entry) => {
                    stats.reclaimed += 1;
                    stats.bytes_reclaimed += entry.footprint;
                    *slot = None;
                    self.free.push(index);
                }
                None => {}
            }
        }
        self.bytes_in_use -= stats.bytes_reclaimed;
        self.allocations_since_collect = 0;
        self.stats = stats;
        debug!(
            live = stats.live,
            reclaimed = stats.reclaimed,
            bytes = stats.bytes_reclaimed,
            "garbage collection finished"
        );
        stats
    }

    fn entry(&self, id: ObjectId) -> VmResult<&Entry<'a>> {
        id.index()
            .and_then(|index| self.entries.get(index))
            .and_then(Option::as_ref)
            .ok_or(VmError::InvalidObject(id))
    }

    fn entry_mut(&mut self, id: ObjectId) -> VmResult<&mut Entry<'a>> {
        id.index()
            .and_then(|index| self.entries.get_mut(index))
            .and_then(Option::as_mut)
            .ok_or(VmError::InvalidObject(id))
    }
}

/// Gathers the roots implied by pending undo records: every old value that
/// references an object.
pub(crate) fn undo_roots<'r>(records: impl Iterator<Item = &'r UndoRecord>) -> Vec<Value> {
    records
        .filter(|record| matches!(record.old_value, Value::Obj(_)))
        .map(|record| record.old_value)
        .collect()
}
