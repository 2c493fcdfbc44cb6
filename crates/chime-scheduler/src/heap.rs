//! Array-backed binary min-heap keyed by an epoch-millisecond priority.
//!
//! Entries with equal priorities come out in whatever order the sift
//! operations leave them. There is no FIFO guarantee for ties.

/// A value stored in the heap together with its priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapEntry<T> {
    /// The payload.
    pub value: T,
    /// Epoch milliseconds; lower sorts first.
    pub priority: i64,
}

/// Binary min-heap over [`HeapEntry`] values.
///
/// For every index `i`, `entries[i].priority <= entries[2i + 1].priority`
/// and `entries[i].priority <= entries[2i + 2].priority` whenever those
/// children exist.
#[derive(Debug, Clone)]
pub struct TimerHeap<T> {
    entries: Vec<HeapEntry<T>>,
}

impl<T> Default for TimerHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerHeap<T> {
    /// Create an empty heap.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the heap holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a value with the given priority. O(log n).
    pub fn enqueue(&mut self, value: T, priority: i64) {
        self.entries.push(HeapEntry { value, priority });
        let last = self.entries.len() - 1;
        self.sift_up(last);
    }

    /// The minimum entry, without removing it. O(1).
    pub fn peek(&self) -> Option<&HeapEntry<T>> {
        self.entries.first()
    }

    /// Remove and return the minimum value. O(log n).
    ///
    /// Returns `None` on an empty heap.
    pub fn dequeue(&mut self) -> Option<T> {
        self.take_at(0).map(|entry| entry.value)
    }

    /// Remove the first entry (in array order) whose value matches `predicate`.
    ///
    /// Linear scan, then swap-with-last and re-sift in both directions.
    /// Returns `false` if nothing matched.
    pub fn remove<F>(&mut self, predicate: F) -> bool
    where
        F: FnMut(&T) -> bool,
    {
        self.take_where(predicate).is_some()
    }

    /// Like [`TimerHeap::remove`], but hands back the removed value.
    pub fn take_where<F>(&mut self, mut predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let index = self.entries.iter().position(|entry| predicate(&entry.value))?;
        self.take_at(index).map(|entry| entry.value)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Values in internal array order.
    ///
    /// This is not sorted. The only ordering promise is that the first
    /// element is a minimum.
    pub fn to_ordered_snapshot(&self) -> Vec<&T> {
        self.entries.iter().map(|entry| &entry.value).collect()
    }

    /// Check the min-heap property over every parent/child pair. O(n).
    ///
    /// Test oracle; not meant for the dispatch path.
    pub fn validate_invariant(&self) -> bool {
        (1..self.entries.len())
            .all(|child| self.entries[(child - 1) / 2].priority <= self.entries[child].priority)
    }

    fn take_at(&mut self, index: usize) -> Option<HeapEntry<T>> {
        if index >= self.entries.len() {
            return None;
        }

        let removed = self.entries.swap_remove(index);
        if index < self.entries.len() {
            // The element moved into `index` came from the bottom of the heap,
            // but it may still be smaller than its new parent.
            let settled = self.sift_down(index);
            if settled == index {
                self.sift_up(index);
            }
        }
        Some(removed)
    }

    fn sift_up(&mut self, mut index: usize) -> usize {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.entries[index].priority >= self.entries[parent].priority {
                break;
            }
            self.entries.swap(index, parent);
            index = parent;
        }
        index
    }

    fn sift_down(&mut self, mut index: usize) -> usize {
        let len = self.entries.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;

            if left < len && self.entries[left].priority < self.entries[smallest].priority {
                smallest = left;
            }
            if right < len && self.entries[right].priority < self.entries[smallest].priority {
                smallest = right;
            }
            if smallest == index {
                return index;
            }
            self.entries.swap(index, smallest);
            index = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // === Unit Tests ===

    #[test]
    fn test_empty_heap() {
        let mut heap: TimerHeap<&str> = TimerHeap::new();
        assert!(heap.is_empty());
        assert_eq!(heap.len(), 0);
        assert!(heap.peek().is_none());
        assert!(heap.dequeue().is_none());
        assert!(!heap.remove(|_| true));
        assert!(heap.validate_invariant());
    }

    #[test]
    fn test_dequeue_in_priority_order() {
        let mut heap = TimerHeap::new();
        heap.enqueue("c", 300);
        heap.enqueue("a", 100);
        heap.enqueue("d", 400);
        heap.enqueue("b", 200);

        assert_eq!(heap.peek().map(|e| e.priority), Some(100));
        assert_eq!(heap.dequeue(), Some("a"));
        assert_eq!(heap.dequeue(), Some("b"));
        assert_eq!(heap.dequeue(), Some("c"));
        assert_eq!(heap.dequeue(), Some("d"));
        assert_eq!(heap.dequeue(), None);
    }

    #[test]
    fn test_peek_does_not_mutate() {
        let mut heap = TimerHeap::new();
        heap.enqueue(1u32, 10);
        heap.enqueue(2u32, 5);

        let first = heap.peek().cloned();
        let second = heap.peek().cloned();
        assert_eq!(first, second);
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn test_remove_missing_returns_false() {
        let mut heap = TimerHeap::new();
        heap.enqueue("a", 1);
        assert!(!heap.remove(|v| *v == "zzz"));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_remove_first_match_only() {
        let mut heap = TimerHeap::new();
        heap.enqueue("dup", 10);
        heap.enqueue("dup", 20);
        heap.enqueue("other", 5);

        assert!(heap.remove(|v| *v == "dup"));
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.to_ordered_snapshot().iter().filter(|v| ***v == "dup").count(), 1);
        assert!(heap.validate_invariant());
    }

    #[test]
    fn test_remove_requires_sift_up() {
        // Removing index 4 pulls the last element (priority 3) under a
        // parent with priority 50, so it has to move up.
        let mut heap = TimerHeap::new();
        for (value, priority) in [(0, 1), (1, 50), (2, 3), (3, 60), (4, 70), (5, 4), (6, 2)] {
            heap.enqueue(value, priority);
        }
        assert!(heap.validate_invariant());

        assert!(heap.remove(|v| *v == 4));
        assert!(heap.validate_invariant());

        let mut drained = Vec::new();
        while let Some(v) = heap.dequeue() {
            drained.push(v);
        }
        assert_eq!(drained, vec![0, 6, 2, 5, 1, 3]);
    }

    #[test]
    fn test_remove_root() {
        let mut heap = TimerHeap::new();
        heap.enqueue("a", 1);
        heap.enqueue("b", 2);
        heap.enqueue("c", 3);
        assert!(heap.remove(|v| *v == "a"));
        assert_eq!(heap.peek().map(|e| e.value), Some("b"));
    }

    #[test]
    fn test_snapshot_root_is_minimum() {
        let mut heap = TimerHeap::new();
        for p in [9, 3, 7, 1, 8] {
            heap.enqueue(p, p);
        }
        let snapshot = heap.to_ordered_snapshot();
        assert_eq!(snapshot.len(), 5);
        assert_eq!(*snapshot[0], 1);
    }

    #[test]
    fn test_clear() {
        let mut heap = TimerHeap::new();
        heap.enqueue("a", 1);
        heap.enqueue("b", 2);
        heap.clear();
        assert!(heap.is_empty());
    }

    #[test]
    fn test_take_where_returns_value() {
        let mut heap = TimerHeap::new();
        heap.enqueue(String::from("x"), 5);
        assert_eq!(heap.take_where(|v| v == "x"), Some(String::from("x")));
        assert!(heap.take_where(|v| v == "x").is_none());
    }

    #[test]
    fn test_negative_and_extreme_priorities() {
        let mut heap = TimerHeap::new();
        heap.enqueue("max", i64::MAX);
        heap.enqueue("min", i64::MIN);
        heap.enqueue("zero", 0);
        heap.enqueue("neg", -5);
        assert_eq!(heap.dequeue(), Some("min"));
        assert_eq!(heap.dequeue(), Some("neg"));
        assert_eq!(heap.dequeue(), Some("zero"));
        assert_eq!(heap.dequeue(), Some("max"));
    }

    // === Property-Based Tests ===

    proptest! {
        // Draining 1000 random priorities yields a non-decreasing sequence
        #[test]
        fn drain_is_sorted(priorities in prop::collection::vec(any::<i64>(), 1000)) {
            let mut heap = TimerHeap::new();
            for p in &priorities {
                heap.enqueue(*p, *p);
            }
            prop_assert!(heap.validate_invariant());
            prop_assert_eq!(heap.len(), 1000);

            let mut drained = Vec::with_capacity(1000);
            while let Some(p) = heap.dequeue() {
                drained.push(p);
            }

            prop_assert!(heap.is_empty());
            prop_assert_eq!(drained.len(), 1000);
            prop_assert!(drained.windows(2).all(|w| w[0] <= w[1]));
        }

        // Invariant holds after each removal, wherever the match sits
        #[test]
        fn remove_preserves_invariant(
            priorities in prop::collection::vec(-1000i64..1000, 1..64),
            picks in prop::collection::vec(any::<prop::sample::Index>(), 1..16),
        ) {
            let mut heap = TimerHeap::new();
            for (id, p) in priorities.iter().enumerate() {
                heap.enqueue(id, *p);
            }

            for pick in picks {
                if heap.is_empty() {
                    break;
                }
                let target = *heap.to_ordered_snapshot()[pick.index(heap.len())];
                let before = heap.len();
                prop_assert!(heap.remove(|v| *v == target));
                prop_assert_eq!(heap.len(), before - 1);
                prop_assert!(heap.validate_invariant());
                prop_assert!(!heap.to_ordered_snapshot().contains(&&target));
            }
        }

        // Dequeue always returns the current minimum priority
        #[test]
        fn dequeue_returns_minimum(priorities in prop::collection::vec(any::<i64>(), 1..200)) {
            let mut heap = TimerHeap::new();
            for p in &priorities {
                heap.enqueue(*p, *p);
            }
            let mut remaining = priorities.clone();
            while let Some(p) = heap.dequeue() {
                let min = *remaining.iter().min().unwrap();
                prop_assert_eq!(p, min);
                let pos = remaining.iter().position(|x| *x == min).unwrap();
                remaining.swap_remove(pos);
            }
        }
    }
}
