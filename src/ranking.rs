use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use serde::Serialize;

/// A named counter as exported in ranked lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Kv {
    pub key: String,
    pub value: i64,
}

impl Kv {
    pub fn new(key: impl Into<String>, value: i64) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

// Rank order: higher value ranks higher, ties go to the lexicographically smaller key.
impl Ord for Kv {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .cmp(&other.value)
            .then_with(|| other.key.cmp(&self.key))
    }
}

impl PartialOrd for Kv {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort best-ranked first
pub fn rank_descending(entries: &mut [Kv]) {
    entries.sort_unstable_by(|a, b| b.cmp(a));
}

/// Sort lowest value first, as needed for nearest-rank percentiles
pub fn rank_ascending(entries: &mut [Kv]) {
    entries.sort_unstable();
}

/// Label → value accumulator; labels are unique and updates add to the existing value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvCounter {
    entries: HashMap<String, i64>,
}

impl KvCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, label: &str, value: i64) {
        if let Some(existing) = self.entries.get_mut(label) {
            *existing += value;
        } else {
            self.entries.insert(label.to_string(), value);
        }
    }

    pub fn increment(&mut self, label: &str) {
        self.add(label, 1);
    }

    pub fn get(&self, label: &str) -> Option<i64> {
        self.entries.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold another counter in: matching labels add, new labels insert
    pub fn merge(&mut self, other: KvCounter) {
        for (label, value) in other.entries {
            *self.entries.entry(label).or_insert(0) += value;
        }
    }

    /// All entries, best-ranked first, cut to `limit`
    pub fn into_ranked(self, limit: usize) -> Vec<Kv> {
        let mut ranked: Vec<Kv> = self
            .entries
            .into_iter()
            .map(|(key, value)| Kv { key, value })
            .collect();
        rank_descending(&mut ranked);
        ranked.truncate(limit);
        ranked
    }

    /// Stream entries through a bounded min-heap and return the survivors best-ranked first
    pub fn into_bounded(self, capacity: usize) -> Vec<Kv> {
        let mut top = BoundedTopK::new(capacity);
        for (key, value) in self.entries {
            top.push(Kv { key, value });
        }
        top.into_sorted_desc()
    }
}

impl FromIterator<(String, i64)> for KvCounter {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        let mut counter = KvCounter::new();
        for (label, value) in iter {
            counter.add(&label, value);
        }
        counter
    }
}

/// Fixed-capacity collection keeping the largest items seen.
///
/// Backed by a min-heap: once full, every push evicts the current minimum.
#[derive(Debug, Clone)]
pub struct BoundedTopK<T: Ord> {
    capacity: usize,
    heap: BinaryHeap<Reverse<T>>,
}

impl<T: Ord> BoundedTopK<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.saturating_add(1).min(4096)),
        }
    }

    /// Insert `item`, returning whatever fell out of the collection
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.heap.len() >= self.capacity {
            match self.heap.peek() {
                Some(Reverse(min)) if item <= *min => return Some(item),
                None => return Some(item),
                _ => {}
            }
        }

        self.heap.push(Reverse(item));
        if self.heap.len() > self.capacity {
            self.heap.pop().map(|Reverse(evicted)| evicted)
        } else {
            None
        }
    }

    pub fn min(&self) -> Option<&T> {
        self.heap.peek().map(|Reverse(min)| min)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Retained items in no particular order
    pub fn into_vec(self) -> Vec<T> {
        self.heap.into_iter().map(|Reverse(item)| item).collect()
    }

    pub fn into_sorted_desc(self) -> Vec<T> {
        let mut items = self.into_vec();
        items.sort_unstable_by(|a, b| b.cmp(a));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(entries: &[(&str, i64)]) -> KvCounter {
        entries
            .iter()
            .map(|(label, value)| (label.to_string(), *value))
            .collect()
    }

    #[test]
    fn test_counter_add_and_increment() {
        let mut c = KvCounter::new();
        c.increment("GET");
        c.increment("GET");
        c.add("SET", 5);

        assert_eq!(c.get("GET"), Some(2));
        assert_eq!(c.get("SET"), Some(5));
        assert_eq!(c.get("DEL"), None);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_merge_disjoint_is_union() {
        let mut a = counter(&[("a", 1), ("b", 2)]);
        a.merge(counter(&[("c", 3)]));
        assert_eq!(a, counter(&[("a", 1), ("b", 2), ("c", 3)]));
    }

    #[test]
    fn test_merge_overlapping_sums_and_commutes() {
        let x = counter(&[("a", 1), ("b", 2)]);
        let y = counter(&[("b", 10), ("c", 4)]);
        let z = counter(&[("a", 100)]);

        let mut left = x.clone();
        left.merge(y.clone());
        left.merge(z.clone());

        let mut right = z;
        right.merge(y);
        right.merge(x);

        assert_eq!(left, right);
        assert_eq!(left.get("a"), Some(101));
        assert_eq!(left.get("b"), Some(12));
        assert_eq!(left.get("c"), Some(4));
    }

    #[test]
    fn test_into_ranked_orders_and_truncates() {
        let entries = [("low", 1), ("high", 9), ("mid", 5), ("also-mid", 5)];
        let ranked = counter(&entries).into_ranked(3);
        assert_eq!(
            ranked,
            vec![Kv::new("high", 9), Kv::new("also-mid", 5), Kv::new("mid", 5)]
        );
    }

    #[test]
    fn test_bounded_keeps_largest() {
        let mut top = BoundedTopK::new(3);
        for value in [5, 1, 9, 3, 7, 2] {
            top.push(value);
        }
        assert_eq!(top.len(), 3);
        assert_eq!(top.min(), Some(&5));
        assert_eq!(top.into_sorted_desc(), vec![9, 7, 5]);
    }

    #[test]
    fn test_bounded_push_reports_eviction() {
        let mut top = BoundedTopK::new(2);
        assert_eq!(top.push(4), None);
        assert_eq!(top.push(6), None);
        assert_eq!(top.push(5), Some(4));
        assert_eq!(top.push(1), Some(1));
        assert_eq!(top.into_sorted_desc(), vec![6, 5]);
    }

    #[test]
    fn test_bounded_matches_full_sort() {
        let entries: Vec<(String, i64)> = (0..200)
            .map(|i| (format!("key{i}"), (i * 37 % 101) as i64))
            .collect();

        let bounded = entries.iter().cloned().collect::<KvCounter>().into_bounded(11);
        let full = entries.into_iter().collect::<KvCounter>().into_ranked(11);
        assert_eq!(bounded, full);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut top = BoundedTopK::new(0);
        assert_eq!(top.push(1), Some(1));
        assert!(top.is_empty());
    }
}
