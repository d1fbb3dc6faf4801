//! List and Vector collections.
//!
//! Both kinds store their elements as a [`PackedSequence`] of five-byte
//! slots and share one set of algorithms:
//!
//! - [`ListRef`]: immutable lists; every "change" builds a new list
//! - [`VectorRef`]: mutable vectors whose changes are undoable
//! - [`IterRef`]: index iterators over either kind
//! - [`algebra`]: searches, set operations and callback scans over any
//!   list-like value
//! - [`Sortable`]: the in-place quicksort and its sequence adapters
//!
//! # Examples
//!
//! ## Lists
//!
//! ```rust
//! use t3vm_collections::VmConfig;
//! use t3vm_collections::collection::ListRef;
//! use t3vm_collections::runtime::{Value, Vm};
//!
//! let mut vm = Vm::new(VmConfig::default())?;
//! let list = ListRef::create(&mut vm, &[Value::Int(1), Value::Int(2), Value::Int(3)])?;
//! let more = ListRef::create(&mut vm, &[Value::Int(4), Value::Int(5)])?;
//!
//! let sum = list.add(&mut vm, more.value())?;
//! assert_eq!(sum.len(&vm)?, 5);
//! assert_eq!(list.len(&vm)?, 3);
//! # Ok::<(), t3vm_collections::VmError>(())
//! ```
//!
//! ## Vectors
//!
//! ```rust
//! use t3vm_collections::VmConfig;
//! use t3vm_collections::collection::VectorRef;
//! use t3vm_collections::runtime::{Value, Vm};
//!
//! let mut vm = Vm::new(VmConfig::default())?;
//! let vector = VectorRef::create_from_values(&mut vm, &[Value::Int(1), Value::Int(2), Value::Int(3)])?;
//!
//! vector.set_length(&mut vm, 5)?;
//! assert_eq!(vector.get(&vm, 5)?, Value::Nil);
//! # Ok::<(), t3vm_collections::VmError>(())
//! ```

pub mod algebra;
mod iter;
mod list;
mod packed;
mod sort;
mod vector;

pub use iter::{FLAG_UNDO, IndexIterator, IterRef};
pub use list::{List, ListRef, ListStorage};
pub use packed::{LENGTH_PREFIX_SIZE, Layout, MAX_ELEMENTS, PackedSequence, Sequence, SlotView};
pub use sort::{Comparator, SortContext, Sortable, ValueSorter, sort, sort_range};
pub use vector::{DirtyBits, Vector, VectorRef, VectorSorter};
