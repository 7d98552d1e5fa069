//! Property-based tests for weight tables.

use approx::assert_abs_diff_eq;
use groundquery_tensor::{
    Assignment, DenseTensor, DiscreteVariable, Relabeling, VariableSet, WeightedRelationTable,
};
use proptest::prelude::*;

// ============================================================================
// Helper Functions
// ============================================================================

/// A table with one index variable per entry of `sizes` (numbered from 0)
/// and a boolean value variable after them.
fn table(sizes: &[usize]) -> WeightedRelationTable {
    let mut index = VariableSet::empty();
    for (num, &size) in sizes.iter().enumerate() {
        let outcomes = (0..size).map(|i| format!("e{}", i)).collect();
        index.insert(num, DiscreteVariable::new(format!("v{}", num), outcomes));
    }
    let value = VariableSet::singleton(sizes.len(), DiscreteVariable::boolean("truth"));
    WeightedRelationTable::from_variables(index, value, 0.0).unwrap()
}

fn sizes() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..4, 0..4)
}

proptest! {
    /// Property: linear indices and index assignments are in bijection.
    #[test]
    fn linear_index_round_trip(sizes in sizes()) {
        let table = table(&sizes);
        let count = table.num_index_assignments();
        prop_assert_eq!(count, sizes.iter().product::<usize>());
        for index in 0..count {
            let key = table.linear_index_to_assignment(index).unwrap();
            prop_assert_eq!(table.assignment_to_linear_index(&key).unwrap(), index);

            let assignment = table.ilp_index_to_assignment(index).unwrap();
            prop_assert_eq!(table.ilp_variable_index(&assignment).unwrap(), index);
        }
        prop_assert!(table.linear_index_to_assignment(count).is_err());
    }

    /// Property: the best assignment holds exactly one `1` per index assignment,
    /// at a maximal weight.
    #[test]
    fn best_assignment_is_one_hot(
        weights in prop::collection::vec((-5.0f64..5.0, -5.0f64..5.0), 1..6)
    ) {
        let index = VariableSet::singleton(
            0,
            DiscreteVariable::new("entity", (0..weights.len()).map(|i| i.to_string()).collect()),
        );
        let table = WeightedRelationTable::from_boolean_weights(index, 1, &weights).unwrap();
        let best = table.best_assignment().unwrap();
        prop_assert_eq!(best.sum_all() as usize, weights.len());

        let expected: f64 = weights.iter().map(|&(f, t)| f.max(t)).sum();
        assert_abs_diff_eq!(table.assignment_weight(&best).unwrap(), expected, epsilon = 1e-9);
    }

    /// Property: relabeling there and back is the identity.
    #[test]
    fn relabel_round_trip(values in prop::collection::vec(-5.0f64..5.0, 12)) {
        let tensor = DenseTensor::from_vec(vec![0, 1, 2], vec![2, 3, 2], values).unwrap();
        let relabeling = Relabeling::from_pairs([(0, 7), (1, 3), (2, 5)]);
        let moved = tensor.relabel(&relabeling).unwrap();
        prop_assert_eq!(moved.dims(), &[3, 5, 7][..]);
        let back = moved.relabel(&relabeling.inverse().unwrap()).unwrap();
        prop_assert_eq!(back, tensor);
    }
}

#[test]
fn assignment_keys_follow_variable_order() {
    let assignment = Assignment::from_key(&[0, 4], &[1, 2]).unwrap();
    assert_eq!(assignment.key_for(&[0, 4]).unwrap(), vec![1, 2]);
    let relabeled = assignment.map_variables(&Relabeling::from_pairs([(4, 1)]));
    assert_eq!(relabeled.nums(), vec![1]);
}
