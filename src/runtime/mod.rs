//! The runtime services collections are built on.
//!
//! - [`Value`]: the five-byte tagged value stored in every slot
//! - [`Heap`]: the object arena with mark-and-sweep collection
//! - [`RootStack`] / [`RootGuard`]: explicit keep-alive registration
//! - [`UndoJournal`]: savepoints and reversible change records
//! - [`Interpreter`]: how callbacks are invoked
//! - [`ConstantPool`]: read-only constant lists and strings
//! - [`Vm`]: the context that ties them together
//!
//! # Examples
//!
//! ```rust
//! use t3vm_collections::VmConfig;
//! use t3vm_collections::runtime::{NativeInterpreter, Value, Vm};
//!
//! let mut natives = NativeInterpreter::new();
//! let negate = natives.register(|_, arguments| Ok(Value::Int(-arguments[0].expect_int()?)));
//!
//! let mut vm = Vm::new(VmConfig::default())?.with_interpreter(natives);
//! assert_eq!(vm.invoke(negate, &[Value::Int(4)])?, Value::Int(-4));
//! # Ok::<(), t3vm_collections::VmError>(())
//! ```

mod heap;
mod image;
mod interpreter;
mod undo;
mod value;
mod vm;

pub use heap::{GcStats, Heap, Object, RootGuard, RootStack, Trace, Tracer};
pub use image::{ConstantPool, ConstantPoolBuilder};
pub use interpreter::{CallArgs, Interpreter, NativeFunction, NativeInterpreter};
pub use undo::{LENGTH_KEY, UndoJournal, UndoRecord};
pub use value::{ObjectId, SLOT_SIZE, TypeTag, Value};
pub use vm::{SeqRef, Vm};
