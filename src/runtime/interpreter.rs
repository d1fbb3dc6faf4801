//! Callback invocation.
//!
//! Collections never run user code themselves; they hand a function value
//! and its arguments to an [`Interpreter`]. The callback receives the whole
//! [`Vm`], so it may allocate, trigger a collection or mutate the very
//! collection being iterated.

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{VmError, VmResult};
use crate::runtime::{Value, Vm};

/// Argument buffer for callbacks; no collection callback takes more than two.
pub type CallArgs = SmallVec<[Value; 2]>;

/// Something that can run function values.
pub trait Interpreter {
    /// Returns `true` if `function` can be passed to [`Interpreter::call`].
    fn is_callable(&self, function: &Value) -> bool;

    /// Calls `function` with `arguments` and returns its result.
    ///
    /// # Errors
    ///
    /// Returns whatever error the callee raises.
    fn call(&self, vm: &mut Vm<'_>, function: Value, arguments: &[Value]) -> VmResult<Value>;
}

/// Signature of a natively implemented callback.
pub type NativeFunction = dyn Fn(&mut Vm<'_>, &[Value]) -> VmResult<Value>;

/// An [`Interpreter`] backed by Rust closures.
///
/// Each registered closure is addressed by a [`Value::FuncPtr`].
///
/// # Examples
///
/// ```rust
/// use t3vm_collections::runtime::{Interpreter, NativeInterpreter, Value};
///
/// let mut natives = NativeInterpreter::new();
/// let double = natives.register(|_, arguments| {
///     Ok(Value::Int(arguments[0].expect_int()? * 2))
/// });
/// assert!(natives.is_callable(&double));
/// assert!(!natives.is_callable(&Value::Int(1)));
/// ```
#[derive(Default, Clone)]
pub struct NativeInterpreter {
    functions: FxHashMap<u32, Rc<NativeFunction>>,
    next_id: u32,
}

impl NativeInterpreter {
    /// Creates an interpreter with no functions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` and returns the value that calls it.
    pub fn register(
        &mut self,
        function: impl Fn(&mut Vm<'_>, &[Value]) -> VmResult<Value> + 'static,
    ) -> Value {
        self.next_id += 1;
        self.functions.insert(self.next_id, Rc::new(function));
        Value::FuncPtr(self.next_id)
    }

    /// Number of registered functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Returns `true` if nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Interpreter for NativeInterpreter {
    fn is_callable(&self, function: &Value) -> bool {
        matches!(function, Value::FuncPtr(id) if self.functions.contains_key(id))
    }

    fn call(&self, vm: &mut Vm<'_>, function: Value, arguments: &[Value]) -> VmResult<Value> {
        let Value::FuncPtr(id) = function else {
            return Err(VmError::wrong_type("function pointer"));
        };
        let native = self
            .functions
            .get(&id)
            .cloned()
            .ok_or(VmError::wrong_type("function pointer"))?;
        native(vm, arguments)
    }
}

impl fmt::Debug for NativeInterpreter {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("NativeInterpreter")
            .field("functions", &self.functions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use rstest::rstest;

    #[rstest]
    fn test_register_assigns_distinct_pointers() {
        let mut natives = NativeInterpreter::new();
        let first = natives.register(|_, _| Ok(Value::Nil));
        let second = natives.register(|_, _| Ok(Value::True));
        assert_ne!(first, second);
        assert_eq!(natives.len(), 2);
    }

    #[rstest]
    fn test_call_passes_arguments() {
        let mut natives = NativeInterpreter::new();
        let add = natives.register(|_, arguments| {
            Ok(Value::Int(arguments[0].expect_int()? + arguments[1].expect_int()?))
        });
        let mut vm = Vm::new(VmConfig::default()).unwrap().with_interpreter(natives);
        let result = vm.invoke(add, &[Value::Int(2), Value::Int(3)]).unwrap();
        assert_eq!(result, Value::Int(5));
    }

    #[rstest]
    fn test_call_unknown_pointer_is_wrong_type() {
        let natives = NativeInterpreter::new();
        let mut vm = Vm::new(VmConfig::default()).unwrap();
        let result = natives.call(&mut vm, Value::FuncPtr(9), &[]);
        assert!(matches!(result, Err(VmError::WrongType { .. })));
    }
}
