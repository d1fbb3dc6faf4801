//! Operations shared by every sequence-like value.
//!
//! Functions here read their operands through [`Vm::sequence`], so they work
//! the same for lists, vectors and constant lists. They return plain value
//! buffers; the caller decides which kind of collection to build from them.
//!
//! Functions that run callbacks re-read the operand's length on every step,
//! because the callback may shrink or grow the operand. Anything they
//! collect that is no longer reachable from the operand is kept alive
//! through the caller's [`RootGuard`] until the caller has stored it.

use smallvec::smallvec;

use crate::error::{VmError, VmResult};
use crate::runtime::{CallArgs, RootGuard, Value, Vm};

/// Scan direction for the `*_which` searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// First element to last.
    Forward,
    /// Last element to first.
    Backward,
}

/// Which extreme [`min_max`] selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extreme {
    /// The smallest value.
    Min,
    /// The largest value.
    Max,
}

/// Converts a zero-based search result into the user-facing value: a
/// one-based index, or `nil` when nothing matched.
#[must_use]
pub fn index_value(index: Option<usize>) -> Value {
    index.map_or(Value::Nil, |index| Value::from_count(index + 1))
}

fn elements_of(vm: &Vm<'_>, value: &Value) -> VmResult<Vec<Value>> {
    vm.sequence_values(value)?
        .ok_or(VmError::wrong_type("list-like value"))
}

/// The elements of `value` if it is list-like, otherwise `value` itself as
/// a one-element set.
fn operand_set(vm: &Vm<'_>, value: &Value) -> VmResult<Vec<Value>> {
    Ok(vm.sequence_values(value)?.unwrap_or_else(|| vec![*value]))
}

fn contains(vm: &Vm<'_>, haystack: &[Value], needle: &Value) -> VmResult<bool> {
    for candidate in haystack {
        if vm.values_equal(candidate, needle, 0)? {
            return Ok(true);
        }
    }
    Ok(false)
}

// =============================================================================
// Set algebra
// =============================================================================

/// `lhs + rhs`: the elements of `lhs` followed by the elements of `rhs`, or
/// by `rhs` itself when it is not list-like.
///
/// # Errors
///
/// Returns [`VmError::WrongType`] if `lhs` is not list-like.
pub fn concat(vm: &Vm<'_>, lhs: &Value, rhs: &Value) -> VmResult<Vec<Value>> {
    let mut result = elements_of(vm, lhs)?;
    result.extend(operand_set(vm, rhs)?);
    Ok(result)
}

/// `lhs - rhs`: the elements of `lhs` equal to no element of `rhs`, in `lhs`
/// order. A non-list `rhs` is a one-element set.
///
/// # Errors
///
/// Returns [`VmError::WrongType`] if `lhs` is not list-like.
pub fn difference(vm: &Vm<'_>, lhs: &Value, rhs: &Value) -> VmResult<Vec<Value>> {
    let removed = operand_set(vm, rhs)?;
    let mut result = Vec::new();
    for value in elements_of(vm, lhs)? {
        if !contains(vm, &removed, &value)? {
            result.push(value);
        }
    }
    Ok(result)
}

/// Elements of the shorter operand that also occur in the longer one, in
/// the shorter operand's order. Ties favour `first`.
///
/// # Errors
///
/// Returns [`VmError::WrongType`] unless both operands are list-like.
pub fn intersect(vm: &Vm<'_>, first: &Value, second: &Value) -> VmResult<Vec<Value>> {
    let first = elements_of(vm, first)?;
    let second = elements_of(vm, second)?;
    let (shorter, longer) = if first.len() > second.len() {
        (second, first)
    } else {
        (first, second)
    };
    let mut result = Vec::with_capacity(shorter.len());
    for value in shorter {
        if contains(vm, &longer, &value)? {
            result.push(value);
        }
    }
    Ok(result)
}

/// Keeps the first occurrence of each distinct value.
///
/// # Errors
///
/// Propagates equality errors.
pub fn uniquify(vm: &Vm<'_>, values: &[Value]) -> VmResult<Vec<Value>> {
    let mut unique: Vec<Value> = Vec::with_capacity(values.len());
    for value in values {
        if !contains(vm, &unique, value)? {
            unique.push(*value);
        }
    }
    Ok(unique)
}

// =============================================================================
// Searches by value
// =============================================================================

/// Zero-based position of the first (or last) element equal to `target`.
///
/// # Errors
///
/// Returns [`VmError::WrongType`] if `sequence` is not list-like.
pub fn index_of(
    vm: &Vm<'_>,
    sequence: &Value,
    target: &Value,
    direction: Direction,
) -> VmResult<Option<usize>> {
    let values = elements_of(vm, sequence)?;
    let matches = |value: &Value| vm.values_equal(value, target, 0);
    match direction {
        Direction::Forward => {
            for (index, value) in values.iter().enumerate() {
                if matches(value)? {
                    return Ok(Some(index));
                }
            }
        }
        Direction::Backward => {
            for (index, value) in values.iter().enumerate().rev() {
                if matches(value)? {
                    return Ok(Some(index));
                }
            }
        }
    }
    Ok(None)
}

/// Number of elements equal to `target`.
///
/// # Errors
///
/// Returns [`VmError::WrongType`] if `sequence` is not list-like.
pub fn count_of(vm: &Vm<'_>, sequence: &Value, target: &Value) -> VmResult<usize> {
    let mut count = 0;
    for value in elements_of(vm, sequence)? {
        if vm.values_equal(&value, target, 0)? {
            count += 1;
        }
    }
    Ok(count)
}

// =============================================================================
// Callback-driven scans
// =============================================================================

/// Zero-based position of the first (or last) element for which `function`
/// returns a truthy value.
///
/// # Errors
///
/// Returns [`VmError::WrongType`] if `sequence` is not list-like, and
/// whatever the callback raises.
pub fn index_which(
    vm: &mut Vm<'_>,
    sequence: &Value,
    function: Value,
    direction: Direction,
) -> VmResult<Option<usize>> {
    let _guard = vm.root(&[*sequence, function]);
    match direction {
        Direction::Forward => {
            let mut index = 0;
            while index < vm.sequence_len(sequence)? {
                let value = vm.sequence_get(sequence, index)?;
                if vm.invoke(function, &[value])?.is_truthy() {
                    return Ok(Some(index));
                }
                index += 1;
            }
        }
        Direction::Backward => {
            let mut index = vm.sequence_len(sequence)?;
            loop {
                index = index.min(vm.sequence_len(sequence)?);
                if index == 0 {
                    break;
                }
                index -= 1;
                let value = vm.sequence_get(sequence, index)?;
                if vm.invoke(function, &[value])?.is_truthy() {
                    return Ok(Some(index));
                }
            }
        }
    }
    Ok(None)
}

/// The first (or last) element for which `function` returns a truthy value,
/// or `nil`.
///
/// # Errors
///
/// See [`index_which`].
pub fn val_which(
    vm: &mut Vm<'_>,
    sequence: &Value,
    function: Value,
    direction: Direction,
) -> VmResult<Value> {
    match index_which(vm, sequence, function, direction)? {
        Some(index) => vm.sequence_get(sequence, index),
        None => Ok(Value::Nil),
    }
}

/// Number of elements for which `function` returns a truthy value.
///
/// # Errors
///
/// Returns [`VmError::WrongType`] if `sequence` is not list-like, and
/// whatever the callback raises.
pub fn count_which(vm: &mut Vm<'_>, sequence: &Value, function: Value) -> VmResult<usize> {
    let _guard = vm.root(&[*sequence, function]);
    let mut count = 0;
    let mut index = 0;
    while index < vm.sequence_len(sequence)? {
        let value = vm.sequence_get(sequence, index)?;
        if vm.invoke(function, &[value])?.is_truthy() {
            count += 1;
        }
        index += 1;
    }
    Ok(count)
}

/// Calls `function` on every element, as `f(value)` or, with
/// `with_index`, as `f(index, value)` with a one-based index.
///
/// # Errors
///
/// Returns [`VmError::WrongType`] if `sequence` is not list-like, and
/// whatever the callback raises.
pub fn for_each(
    vm: &mut Vm<'_>,
    sequence: &Value,
    function: Value,
    with_index: bool,
) -> VmResult<()> {
    let _guard = vm.root(&[*sequence, function]);
    let mut index = 0;
    while index < vm.sequence_len(sequence)? {
        let value = vm.sequence_get(sequence, index)?;
        let arguments: CallArgs = if with_index {
            smallvec![Value::from_count(index + 1), value]
        } else {
            smallvec![value]
        };
        vm.invoke(function, &arguments)?;
        index += 1;
    }
    Ok(())
}

/// Elements for which `function` returns a truthy value. Kept elements are
/// rooted through `guard`.
///
/// # Errors
///
/// Returns [`VmError::WrongType`] if `sequence` is not list-like, and
/// whatever the callback raises.
pub fn subset(
    vm: &mut Vm<'_>,
    sequence: &Value,
    function: Value,
    guard: &RootGuard,
) -> VmResult<Vec<Value>> {
    guard.keep_all(&[*sequence, function]);
    let mut kept = Vec::new();
    let mut index = 0;
    while index < vm.sequence_len(sequence)? {
        let value = vm.sequence_get(sequence, index)?;
        if vm.invoke(function, &[value])?.is_truthy() {
            guard.keep(value);
            kept.push(value);
        }
        index += 1;
    }
    Ok(kept)
}

/// `function(value)` for every element. Results are rooted through `guard`.
///
/// # Errors
///
/// Returns [`VmError::WrongType`] if `sequence` is not list-like, and
/// whatever the callback raises.
pub fn map(
    vm: &mut Vm<'_>,
    sequence: &Value,
    function: Value,
    guard: &RootGuard,
) -> VmResult<Vec<Value>> {
    guard.keep_all(&[*sequence, function]);
    let mut mapped = Vec::with_capacity(vm.sequence_len(sequence)?);
    let mut index = 0;
    while index < vm.sequence_len(sequence)? {
        let value = vm.sequence_get(sequence, index)?;
        let result = vm.invoke(function, &[value])?;
        guard.keep(result);
        mapped.push(result);
        index += 1;
    }
    Ok(mapped)
}

/// `function(i)` for `i` in `1..=count`. Results are rooted through `guard`.
///
/// # Errors
///
/// Returns [`VmError::WrongType`] if `function` is not callable,
/// [`VmError::BadValue`] for a negative count, and whatever the callback
/// raises.
pub fn generate(
    vm: &mut Vm<'_>,
    function: Value,
    count: i32,
    guard: &RootGuard,
) -> VmResult<Vec<Value>> {
    vm.require_callable(&function)?;
    let count = usize::try_from(count).map_err(|_| VmError::bad_value("negative element count"))?;
    guard.keep(function);
    let mut generated = Vec::with_capacity(count);
    for index in 1..=count {
        let result = vm.invoke(function, &[Value::from_count(index)])?;
        guard.keep(result);
        generated.push(result);
    }
    Ok(generated)
}

/// Finds the smallest or largest element, optionally comparing the results
/// of `function` instead of the elements. Returns the zero-based index of
/// the winner and the winning (possibly mapped) value. Ties keep the
/// earliest element.
///
/// # Errors
///
/// Returns [`VmError::BadValue`] for an empty sequence,
/// [`VmError::WrongType`] if `function` is not callable,
/// [`VmError::InvalidComparison`] for unordered values, and whatever the
/// callback raises.
pub fn min_max(
    vm: &mut Vm<'_>,
    sequence: &Value,
    function: Option<Value>,
    extreme: Extreme,
) -> VmResult<(usize, Value)> {
    if let Some(function) = &function {
        vm.require_callable(function)?;
    }
    if vm.sequence_len(sequence)? == 0 {
        return Err(VmError::bad_value("no elements to compare"));
    }
    let guard = vm.root(&[*sequence]);
    if let Some(function) = function {
        guard.keep(function);
    }
    let mut winner: Option<(usize, Value)> = None;
    let mut index = 0;
    while index < vm.sequence_len(sequence)? {
        let mut candidate = vm.sequence_get(sequence, index)?;
        if let Some(function) = function {
            candidate = vm.invoke(function, &[candidate])?;
            guard.keep(candidate);
        }
        let replaces = match &winner {
            None => true,
            Some((_, best)) => {
                let ordering = vm.compare(&candidate, best)?;
                match extreme {
                    Extreme::Min => ordering.is_lt(),
                    Extreme::Max => ordering.is_gt(),
                }
            }
        };
        if replaces {
            winner = Some((index, candidate));
        }
        index += 1;
    }
    winner.ok_or(VmError::bad_value("no elements to compare"))
}

// =============================================================================
// Joining
// =============================================================================

/// Concatenates the elements' text with an optional separator.
///
/// `nil` contributes nothing, integers are decimal and strings are used as
/// they are; anything else goes through the runtime's string conversion.
///
/// # Errors
///
/// Returns [`VmError::WrongType`] if the separator is neither `nil` nor a
/// string, or if an element has no string form.
pub fn join(vm: &Vm<'_>, sequence: &Value, separator: Option<&Value>) -> VmResult<String> {
    let separator = match separator {
        None | Some(Value::Nil) => "",
        Some(value) => vm
            .string_of(value)?
            .ok_or(VmError::wrong_type("string separator"))?,
    };
    let values = elements_of(vm, sequence)?;

    let mut estimate = separator.len() * values.len().saturating_sub(1);
    for value in &values {
        estimate += match (vm.string_of(value)?, value) {
            (Some(text), _) => text.len(),
            (None, Value::Int(_)) => 10,
            (None, Value::Obj(_)) => 128,
            (None, _) => 0,
        };
    }

    let mut joined = String::with_capacity(estimate);
    for (position, value) in values.iter().enumerate() {
        if position > 0 {
            joined.push_str(separator);
        }
        if let Some(text) = vm.string_of(value)? {
            joined.push_str(text);
            continue;
        }
        match value {
            Value::Nil => {}
            Value::Int(number) => joined.push_str(&number.to_string()),
            other => joined.push_str(&vm.to_display_string(other)?),
        }
    }
    Ok(joined)
}
