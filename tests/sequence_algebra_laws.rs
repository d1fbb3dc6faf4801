//! Property-based tests for the laws shared by lists and vectors.

use proptest::prelude::*;
use t3vm_collections::VmConfig;
use t3vm_collections::collection::{Layout, ListRef, PackedSequence, VectorRef, algebra};
use t3vm_collections::runtime::{Value, Vm};

fn ints(values: &[i32]) -> Vec<Value> {
    values.iter().copied().map(Value::Int).collect()
}

fn vm() -> Vm<'static> {
    Vm::new(VmConfig::default()).unwrap()
}

// =============================================================================
// Concatenation and uniqueness
// =============================================================================

proptest! {
    /// Concatenation Law: len(a + b) == len(a) + len(b)
    #[test]
    fn prop_concat_length(
        first in prop::collection::vec(any::<i32>(), 0..30),
        second in prop::collection::vec(any::<i32>(), 0..30)
    ) {
        let mut vm = vm();
        let lhs = ListRef::create(&mut vm, &ints(&first)).unwrap();
        let rhs = ListRef::create(&mut vm, &ints(&second)).unwrap();

        let sum = lhs.add(&mut vm, rhs.value()).unwrap();
        prop_assert_eq!(sum.len(&vm).unwrap(), first.len() + second.len());
        prop_assert_eq!(lhs.len(&vm).unwrap(), first.len());
    }

    /// Idempotence Law: uniquify(uniquify(x)) == uniquify(x)
    #[test]
    fn prop_uniquify_is_idempotent(values in prop::collection::vec(0..10i32, 0..40)) {
        let vm = vm();
        let once = algebra::uniquify(&vm, &ints(&values)).unwrap();
        let twice = algebra::uniquify(&vm, &once).unwrap();
        prop_assert_eq!(once, twice);
    }

    /// Vector and list uniqueness agree.
    #[test]
    fn prop_get_unique_agrees_across_kinds(values in prop::collection::vec(0..10i32, 0..40)) {
        let mut vm = vm();
        let list = ListRef::create(&mut vm, &ints(&values)).unwrap();
        let vector = VectorRef::create_from_values(&mut vm, &ints(&values)).unwrap();

        let from_list = list.get_unique(&mut vm).unwrap().values(&vm).unwrap();
        let from_vector = vector.get_unique(&mut vm).unwrap().values(&vm).unwrap();
        prop_assert_eq!(from_list, from_vector);
    }

    /// Difference Law: nothing in b survives a - b.
    #[test]
    fn prop_difference_removes_every_match(
        first in prop::collection::vec(0..10i32, 0..30),
        second in prop::collection::vec(0..10i32, 0..10)
    ) {
        let mut vm = vm();
        let lhs = ListRef::create(&mut vm, &ints(&first)).unwrap();
        let rhs = ListRef::create(&mut vm, &ints(&second)).unwrap();

        let difference = lhs.sub(&mut vm, rhs.value()).unwrap();
        for value in difference.values(&vm).unwrap() {
            prop_assert!(!ints(&second).contains(&value));
        }
    }
}

// =============================================================================
// Sorting
// =============================================================================

proptest! {
    /// Permutation Law: sorting preserves the multiset of elements.
    #[test]
    fn prop_sort_preserves_elements(values in prop::collection::vec(any::<i32>(), 0..60)) {
        let mut vm = vm();
        let vector = VectorRef::create_from_values(&mut vm, &ints(&values)).unwrap();
        vector.sort(&mut vm, false, None).unwrap();

        let mut expected = values;
        expected.sort_unstable();
        prop_assert_eq!(vector.values(&vm).unwrap(), ints(&expected));
    }

    /// Reversal Law: for distinct elements, descending is ascending reversed.
    #[test]
    fn prop_descending_reverses_ascending(
        values in prop::collection::hash_set(any::<i32>(), 0..40)
    ) {
        let values: Vec<i32> = values.into_iter().collect();
        let mut vm = vm();
        let list = ListRef::create(&mut vm, &ints(&values)).unwrap();

        let ascending = list.sort(&mut vm, false, None).unwrap().values(&vm).unwrap();
        let mut descending = list.sort(&mut vm, true, None).unwrap().values(&vm).unwrap();
        descending.reverse();
        prop_assert_eq!(ascending, descending);
    }
}

// =============================================================================
// Packed layout
// =============================================================================

proptest! {
    /// Round-Trip Law: decode(encode(v)) == v
    #[test]
    fn prop_packed_round_trip(
        values in prop::collection::vec(any::<i32>(), 0..50),
        spare in 0..10usize
    ) {
        let mut sequence = PackedSequence::with_allocated(values.len() + spare);
        for value in ints(&values) {
            sequence.push(value).unwrap();
        }
        for layout in [Layout::List, Layout::Vector] {
            let bytes = sequence.encode(layout).unwrap();
            let decoded = PackedSequence::decode(&bytes, layout).unwrap();
            prop_assert_eq!(decoded.as_slice(), sequence.as_slice());
        }
    }
}
