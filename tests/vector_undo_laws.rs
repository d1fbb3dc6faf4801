//! Property-based tests for vector undo.
//!
//! Any sequence of mutations made after a savepoint is rolled back exactly
//! by `undo_to_savepoint`.

use proptest::prelude::*;
use t3vm_collections::VmConfig;
use t3vm_collections::collection::VectorRef;
use t3vm_collections::runtime::{Value, Vm};

#[derive(Debug, Clone)]
enum Mutation {
    Set(i32, i32),
    Append(i32),
    Prepend(i32),
    InsertAt(i32, Vec<i32>),
    RemoveElementAt(i32),
    RemoveElement(i32),
    SetLength(i32),
    Splice(i32, i32, Vec<i32>),
    Fill(i32, i32, i32),
    Sort(bool),
    AppendUnique(Vec<i32>),
}

fn mutation() -> impl Strategy<Value = Mutation> {
    let small = -3..8i32;
    let values = prop::collection::vec(0..6i32, 0..4);
    prop_oneof![
        (1..12i32, any::<i32>()).prop_map(|(index, value)| Mutation::Set(index, value)),
        (0..6i32).prop_map(Mutation::Append),
        (0..6i32).prop_map(Mutation::Prepend),
        (small.clone(), values.clone()).prop_map(|(index, values)| Mutation::InsertAt(index, values)),
        small.clone().prop_map(Mutation::RemoveElementAt),
        (0..6i32).prop_map(Mutation::RemoveElement),
        (0..40i32).prop_map(Mutation::SetLength),
        (small.clone(), 0..4i32, values.clone())
            .prop_map(|(start, delete, values)| Mutation::Splice(start, delete, values)),
        (0..6i32, small, 0..30i32).prop_map(|(value, start, count)| Mutation::Fill(value, start, count)),
        any::<bool>().prop_map(Mutation::Sort),
        values.prop_map(Mutation::AppendUnique),
    ]
}

fn ints(values: &[i32]) -> Vec<Value> {
    values.iter().copied().map(Value::Int).collect()
}

// Out-of-range indices are legitimate rejections; the law only concerns the
// state afterward.
fn apply(vm: &mut Vm<'_>, vector: VectorRef, mutation: &Mutation) {
    let _ = match mutation {
        Mutation::Set(index, value) => vector.set(vm, *index, Value::Int(*value)),
        Mutation::Append(value) => vector.append(vm, Value::Int(*value)),
        Mutation::Prepend(value) => vector.prepend(vm, Value::Int(*value)),
        Mutation::InsertAt(index, values) => vector.insert_at(vm, *index, &ints(values)),
        Mutation::RemoveElementAt(index) => vector.remove_element_at(vm, *index),
        Mutation::RemoveElement(value) => vector.remove_element(vm, Value::Int(*value)),
        Mutation::SetLength(length) => vector.set_length(vm, *length),
        Mutation::Splice(start, delete, values) => {
            vector.splice(vm, *start, *delete, &ints(values))
        }
        Mutation::Fill(value, start, count) => {
            vector.fill_val(vm, Value::Int(*value), Some(*start), Some(*count))
        }
        Mutation::Sort(descending) => vector.sort(vm, *descending, None),
        Mutation::AppendUnique(values) => {
            let other = VectorRef::create_from_values(vm, &ints(values))
                .map(|other| other.value())
                .unwrap_or(Value::Nil);
            vector.append_unique(vm, other)
        }
    };
}

proptest! {
    /// Undo Law: rolling back a savepoint restores the exact contents.
    #[test]
    fn prop_undo_restores_contents(
        initial in prop::collection::vec(0..6i32, 0..12),
        mutations in prop::collection::vec(mutation(), 1..12)
    ) {
        let mut vm = Vm::new(VmConfig::default()).unwrap();
        let vector = VectorRef::create_from_values(&mut vm, &ints(&initial)).unwrap();
        vm.add_global_root(vector.value());

        vm.create_savepoint();
        for mutation in &mutations {
            apply(&mut vm, vector, mutation);
        }
        prop_assert!(vm.undo_to_savepoint());

        prop_assert_eq!(vector.values(&vm).unwrap(), ints(&initial));
    }

    /// Nested Undo Law: each savepoint restores the state it was taken in.
    #[test]
    fn prop_nested_savepoints_unwind_in_order(
        initial in prop::collection::vec(0..6i32, 0..8),
        first in prop::collection::vec(mutation(), 1..6),
        second in prop::collection::vec(mutation(), 1..6)
    ) {
        let mut vm = Vm::new(VmConfig::default()).unwrap();
        let vector = VectorRef::create_from_values(&mut vm, &ints(&initial)).unwrap();

        vm.create_savepoint();
        for mutation in &first {
            apply(&mut vm, vector, mutation);
        }
        let middle = vector.values(&vm).unwrap();

        vm.create_savepoint();
        for mutation in &second {
            apply(&mut vm, vector, mutation);
        }

        vm.undo_to_savepoint();
        prop_assert_eq!(vector.values(&vm).unwrap(), middle);
        vm.undo_to_savepoint();
        prop_assert_eq!(vector.values(&vm).unwrap(), ints(&initial));
    }

    /// Dirty-Bit Law: repeated writes to one slot journal it once.
    #[test]
    fn prop_repeated_writes_record_once(
        initial in prop::collection::vec(any::<i32>(), 1..20),
        writes in prop::collection::vec(any::<i32>(), 1..10)
    ) {
        let mut vm = Vm::new(VmConfig::default()).unwrap();
        let vector = VectorRef::create_from_values(&mut vm, &ints(&initial)).unwrap();

        vm.create_savepoint();
        for value in writes {
            vector.set(&mut vm, 1, Value::Int(value)).unwrap();
        }
        prop_assert_eq!(vm.undo().record_count(), 1);
    }
}
