//! In-place quicksort over index-addressable sequences.
//!
//! The algorithm is a Hoare-style partition with the rightmost element as
//! pivot. It is not stable. Direction is applied inside the comparison, so
//! custom comparators sort descending too.

use std::cmp::Ordering;

use crate::error::{VmError, VmResult};
use crate::runtime::{Value, Vm};

// =============================================================================
// SortContext
// =============================================================================

/// How two elements are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Comparator {
    /// The runtime's default ordering: integers numerically, strings by
    /// content.
    #[default]
    Default,
    /// A function value called as `f(a, b)` that returns a negative, zero or
    /// positive integer.
    Callback(Value),
}

/// Direction and comparator for one sort.
///
/// # Examples
///
/// ```rust
/// use t3vm_collections::collection::{Comparator, SortContext};
///
/// let context = SortContext::new(true, None);
/// assert!(context.descending);
/// assert_eq!(context.comparator, Comparator::Default);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortContext {
    /// Reverse the comparator's result.
    pub descending: bool,
    /// The ordering to use.
    pub comparator: Comparator,
}

impl SortContext {
    /// Builds a context from the user-level arguments.
    #[must_use]
    pub const fn new(descending: bool, comparator: Option<Value>) -> Self {
        let comparator = match comparator {
            Some(function) => Comparator::Callback(function),
            None => Comparator::Default,
        };
        Self {
            descending,
            comparator,
        }
    }

    /// The callback value, if there is one. Callers root it for the
    /// duration of the sort.
    #[must_use]
    pub const fn callback(&self) -> Option<Value> {
        match self.comparator {
            Comparator::Callback(function) => Some(function),
            Comparator::Default => None,
        }
    }

    /// Orders two values, honouring `descending`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::InvalidComparison`] for unordered values under the
    /// default comparator, [`VmError::WrongType`] when a callback returns
    /// something other than an integer, and whatever the callback raises.
    pub fn compare(&self, vm: &mut Vm<'_>, left: &Value, right: &Value) -> VmResult<Ordering> {
        let ordering = match self.comparator {
            Comparator::Default => vm.compare(left, right)?,
            Comparator::Callback(function) => match vm.invoke(function, &[*left, *right])? {
                Value::Int(result) => result.cmp(&0),
                _ => return Err(VmError::wrong_type("integer comparison result")),
            },
        };
        Ok(if self.descending {
            ordering.reverse()
        } else {
            ordering
        })
    }
}

// =============================================================================
// Sortable
// =============================================================================

/// A sequence the quicksort can rearrange.
///
/// Indices are zero-based. `set` is where an implementation applies its
/// own bookkeeping, such as undo journalling.
pub trait Sortable<'a> {
    /// Number of elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing object is gone.
    fn len(&self, vm: &Vm<'a>) -> VmResult<usize>;

    /// Element at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] past the end.
    fn get(&self, vm: &Vm<'a>, index: usize) -> VmResult<Value>;

    /// Overwrites the element at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::IndexOutOfRange`] past the end, or any error from
    /// the implementation's bookkeeping.
    fn set(&mut self, vm: &mut Vm<'a>, index: usize, value: Value) -> VmResult<()>;

    /// The direction and comparator in effect.
    fn context(&self) -> &SortContext;

    /// Orders two elements.
    ///
    /// # Errors
    ///
    /// See [`SortContext::compare`].
    fn compare(&self, vm: &mut Vm<'a>, left: &Value, right: &Value) -> VmResult<Ordering> {
        self.context().compare(vm, left, right)
    }

    /// Swaps two elements.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Sortable::get`] and [`Sortable::set`].
    fn exchange(&mut self, vm: &mut Vm<'a>, first: usize, second: usize) -> VmResult<()> {
        let first_value = self.get(vm, first)?;
        let second_value = self.get(vm, second)?;
        self.set(vm, first, second_value)?;
        self.set(vm, second, first_value)
    }
}

/// Sorts the whole sequence in place.
///
/// # Errors
///
/// Propagates comparison and element-access errors; the sequence is left
/// partially sorted.
pub fn sort<'a, S: Sortable<'a> + ?Sized>(vm: &mut Vm<'a>, sequence: &mut S) -> VmResult<()> {
    let len = sequence.len(vm)?;
    if len < 2 {
        return Ok(());
    }
    sort_range(vm, sequence, 0, to_signed(len) - 1)
}

/// Sorts the inclusive zero-based range `[left, right]` in place.
///
/// # Errors
///
/// Propagates comparison and element-access errors.
pub fn sort_range<'a, S: Sortable<'a> + ?Sized>(
    vm: &mut Vm<'a>,
    sequence: &mut S,
    left: isize,
    right: isize,
) -> VmResult<()> {
    if right <= left {
        return Ok(());
    }
    let pivot = sequence.get(vm, to_index(right))?;
    let mut low = left - 1;
    let mut high = right;
    loop {
        low += 1;
        while low < right && less_than_pivot(vm, sequence, low, &pivot)? {
            low += 1;
        }
        high -= 1;
        while high > left && greater_than_pivot(vm, sequence, high, &pivot)? {
            high -= 1;
        }
        if low >= high {
            break;
        }
        sequence.exchange(vm, to_index(low), to_index(high))?;
    }
    if low != right {
        sequence.exchange(vm, to_index(low), to_index(right))?;
    }
    sort_range(vm, sequence, left, low - 1)?;
    sort_range(vm, sequence, low + 1, right)
}

fn less_than_pivot<'a, S: Sortable<'a> + ?Sized>(
    vm: &mut Vm<'a>,
    sequence: &S,
    index: isize,
    pivot: &Value,
) -> VmResult<bool> {
    let value = sequence.get(vm, to_index(index))?;
    Ok(sequence.compare(vm, &value, pivot)? == Ordering::Less)
}

fn greater_than_pivot<'a, S: Sortable<'a> + ?Sized>(
    vm: &mut Vm<'a>,
    sequence: &S,
    index: isize,
    pivot: &Value,
) -> VmResult<bool> {
    let value = sequence.get(vm, to_index(index))?;
    Ok(sequence.compare(vm, &value, pivot)? == Ordering::Greater)
}

// Sequences hold at most 65535 elements, so these conversions never lose
// information.
#[allow(clippy::cast_possible_wrap)]
const fn to_signed(index: usize) -> isize {
    index as isize
}

#[allow(clippy::cast_sign_loss)]
const fn to_index(index: isize) -> usize {
    index as usize
}

// =============================================================================
// ValueSorter
// =============================================================================

/// Sorts a detached buffer of values, as used when a list sorts its copy.
///
/// The buffer lives outside the heap, so the caller roots its contents
/// while callbacks may run.
#[derive(Debug, Clone)]
pub struct ValueSorter {
    values: Vec<Value>,
    context: SortContext,
}

impl ValueSorter {
    /// Wraps `values` for sorting.
    #[must_use]
    pub const fn new(values: Vec<Value>, context: SortContext) -> Self {
        Self { values, context }
    }

    /// Returns the (sorted) values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl<'a> Sortable<'a> for ValueSorter {
    fn len(&self, _vm: &Vm<'a>) -> VmResult<usize> {
        Ok(self.values.len())
    }

    fn get(&self, _vm: &Vm<'a>, index: usize) -> VmResult<Value> {
        self.values
            .get(index)
            .copied()
            .ok_or(VmError::IndexOutOfRange)
    }

    fn set(&mut self, _vm: &mut Vm<'a>, index: usize, value: Value) -> VmResult<()> {
        let slot = self.values.get_mut(index).ok_or(VmError::IndexOutOfRange)?;
        *slot = value;
        Ok(())
    }

    fn context(&self) -> &SortContext {
        &self.context
    }

    fn exchange(&mut self, _vm: &mut Vm<'a>, first: usize, second: usize) -> VmResult<()> {
        if first.max(second) >= self.values.len() {
            return Err(VmError::IndexOutOfRange);
        }
        self.values.swap(first, second);
        Ok(())
    }
}
