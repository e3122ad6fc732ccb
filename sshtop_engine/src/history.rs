//! Bounded FIFO history buffer.

use std::collections::VecDeque;

pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    while dq.len() >= cap.max(1) {
        dq.pop_front();
    }
    dq.push_back(v);
}

/// Keeps the most recent `capacity` entries in insertion order.
#[derive(Debug, Clone)]
pub struct History<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> History<T> {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, v: T) {
        push_capped(&mut self.entries, v, self.capacity);
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

impl<T: Clone> History<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn prop_holds_last_k_in_order(
            capacity in 1usize..64,
            values in prop::collection::vec(any::<u32>(), 0..300)
        ) {
            let mut h = History::new(capacity);
            for &v in &values {
                h.push(v);
            }
            let start = values.len().saturating_sub(capacity);
            prop_assert_eq!(h.to_vec(), values[start..].to_vec());
        }
    }
}
