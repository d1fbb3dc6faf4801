//! # t3vm-collections
//!
//! The List and Vector collections of a T3-style interactive-fiction virtual
//! machine, together with the runtime services they depend on.
//!
//! ## Overview
//!
//! - **Packed storage**: both collections use a length-prefixed array of
//!   five-byte tagged slots, the same shape used in program images and save
//!   files
//! - **Lists**: immutable; every "change" builds a new list. Constant lists
//!   are read in place from the program image
//! - **Vectors**: mutable in place, with every change journalled so that
//!   it can be rolled back to a savepoint
//! - **Iterators**: snapshot and live index iterators
//! - **Runtime**: an object heap with mark-and-sweep collection, an explicit
//!   root stack, an undo journal and a callback interpreter seam
//!
//! ## Feature Flags
//!
//! - `serde`: `Serialize`/`Deserialize` for [`VmConfig`], [`runtime::Value`]
//!   and friends
//!
//! ## Example
//!
//! ```rust
//! use t3vm_collections::prelude::*;
//!
//! let mut vm = Vm::new(VmConfig::default())?;
//! let vector = VectorRef::create_from_values(&mut vm, &[Value::Int(5), Value::Int(3), Value::Int(1)])?;
//!
//! vm.create_savepoint();
//! vector.sort(&mut vm, false, None)?;
//! assert_eq!(vector.values(&vm)?, vec![Value::Int(1), Value::Int(3), Value::Int(5)]);
//!
//! vm.undo_to_savepoint();
//! assert_eq!(vector.values(&vm)?, vec![Value::Int(5), Value::Int(3), Value::Int(1)]);
//! # Ok::<(), VmError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Note: Disabling redundant_closure_for_method_calls due to clippy 0.1.92 panic bug
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// Re-exports the handles, the VM context and the error types.
///
/// # Usage
///
/// ```rust
/// use t3vm_collections::prelude::*;
/// ```
pub mod prelude {
    pub use crate::collection::{IterRef, ListRef, Sequence, VectorRef};
    pub use crate::config::VmConfig;
    pub use crate::error::{VmError, VmResult};
    pub use crate::runtime::{NativeInterpreter, ObjectId, Value, Vm};
}

pub mod collection;
pub mod config;
pub mod error;
pub mod runtime;

pub use config::VmConfig;
pub use error::{VmError, VmResult};
