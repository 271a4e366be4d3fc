//! Property-based tests for context sets.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::context::{ContextSatisfyMode, ContextSet};

    /// Strategy for a small list of context pairs drawn from a narrow alphabet
    /// so that keys and values collide often.
    fn pairs_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
        prop::collection::vec(("[a-c]{1,2}", "[x-z]{1,2}"), 0..6)
    }

    proptest! {
        #[test]
        fn test_equality_is_order_independent(pairs in pairs_strategy()) {
            let mut reversed = pairs.clone();
            reversed.reverse();
            let a = ContextSet::from_pairs(pairs);
            let b = ContextSet::from_pairs(reversed);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.cmp(&b), std::cmp::Ordering::Equal);
        }

        #[test]
        fn test_union_is_commutative(a in pairs_strategy(), b in pairs_strategy()) {
            let a = ContextSet::from_pairs(a);
            let b = ContextSet::from_pairs(b);
            prop_assert_eq!(a.union(&b), b.union(&a));
        }

        #[test]
        fn test_set_is_satisfied_by_any_superset(a in pairs_strategy(), b in pairs_strategy()) {
            let node = ContextSet::from_pairs(a);
            let query = node.union(&ContextSet::from_pairs(b));
            prop_assert!(node.is_satisfied_by(&query, ContextSatisfyMode::AllValuesPerKey));
            prop_assert!(node.is_satisfied_by(&query, ContextSatisfyMode::AtLeastOneValuePerKey));
        }

        #[test]
        fn test_all_values_mode_implies_at_least_one_mode(a in pairs_strategy(), b in pairs_strategy()) {
            let node = ContextSet::from_pairs(a);
            let query = ContextSet::from_pairs(b);
            if node.is_satisfied_by(&query, ContextSatisfyMode::AllValuesPerKey) {
                prop_assert!(node.is_satisfied_by(&query, ContextSatisfyMode::AtLeastOneValuePerKey));
            }
        }

        #[test]
        fn test_freeze_of_mutable_copy_is_identity(pairs in pairs_strategy()) {
            let set = ContextSet::from_pairs(pairs);
            prop_assert_eq!(set.to_mutable().freeze(), set);
        }
    }
}
