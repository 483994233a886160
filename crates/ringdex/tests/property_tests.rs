//! Property-based tests: the structures must agree with simple sequential
//! reference models under arbitrary operation sequences.

use proptest::prelude::*;
use ringdex::{BoundedQueue, SearchTree};
use std::collections::{HashSet, VecDeque};

proptest! {
    /// The queue behaves exactly like a capacity-bounded VecDeque.
    #[test]
    fn prop_queue_matches_deque_model(
        ops in prop::collection::vec(prop::option::of(0u32..1000), 1..200),
    ) {
        const CAPACITY: usize = 8;
        let queue = BoundedQueue::<u32>::new(CAPACITY);
        let mut model = VecDeque::<u32>::new();

        // Some(v) is an enqueue, None a dequeue.
        for op in ops {
            match op {
                Some(value) => {
                    let accepted = queue.enqueue(value).is_ok();
                    let model_accepted = model.len() < CAPACITY;
                    prop_assert_eq!(accepted, model_accepted);
                    if model_accepted {
                        model.push_back(value);
                    }
                }
                None => {
                    prop_assert_eq!(queue.dequeue(), model.pop_front());
                }
            }
            prop_assert_eq!(queue.len(), model.len());
            prop_assert!(queue.len() <= CAPACITY);
        }

        // Drain: the tails must agree too.
        while let Some(expected) = model.pop_front() {
            prop_assert_eq!(queue.dequeue(), Some(expected));
        }
        prop_assert_eq!(queue.dequeue(), None);
    }

    /// The tree behaves exactly like a HashSet of key bits.
    #[test]
    fn prop_tree_matches_set_model(
        ops in prop::collection::vec((prop::bool::ANY, 0i64..24), 1..300),
    ) {
        let tree = SearchTree::with_capacity(32);
        let mut model = HashSet::<i64>::new();

        for (is_add, key) in ops {
            if is_add {
                let (inserted, _) = tree.add(key);
                prop_assert_eq!(inserted, model.insert(key));
            } else {
                prop_assert_eq!(tree.remove(key), model.remove(&key));
            }
            prop_assert_eq!(tree.len(), model.len());
            prop_assert_eq!(
                tree.find_min(),
                model.iter().min().map(|&k| k as f64)
            );
        }

        for key in 0i64..24 {
            prop_assert_eq!(tree.contains(key), model.contains(&key));
        }
    }

    /// Duplicate adds always report the handle of the live leaf.
    #[test]
    fn prop_tree_handle_stability(keys in prop::collection::vec(0i64..16, 1..64)) {
        let tree = SearchTree::with_capacity(16);
        let mut handles = std::collections::HashMap::new();

        for key in keys {
            let (inserted, handle) = tree.add(key);
            match handles.entry(key) {
                std::collections::hash_map::Entry::Vacant(entry) => {
                    prop_assert!(inserted);
                    entry.insert(handle);
                }
                std::collections::hash_map::Entry::Occupied(entry) => {
                    prop_assert!(!inserted);
                    prop_assert_eq!(handle, *entry.get());
                }
            }
        }
    }
}
