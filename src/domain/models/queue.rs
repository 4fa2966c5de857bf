use std::collections::VecDeque;

/// Priority queue entry.
///
/// `sequence` is assigned at enqueue time and breaks ties between entries
/// of equal priority, so ordering never depends on sort stability.
#[derive(Debug, Clone)]
pub struct QueueItem<T> {
    /// Priority rank (higher values = dispatched first)
    pub priority: u8,
    /// Insertion sequence number (lower = enqueued earlier)
    pub sequence: u64,
    /// The wrapped item
    pub item: T,
}

impl<T> QueueItem<T> {
    /// Whether `self` must be dequeued before `other`.
    fn precedes(&self, other: &Self) -> bool {
        (self.priority, std::cmp::Reverse(self.sequence))
            > (other.priority, std::cmp::Reverse(other.sequence))
    }
}

/// Priority queue with FIFO tie-break.
///
/// Items with higher priority are dequeued first; items with equal
/// priority are dequeued in the order they were enqueued. The backing
/// deque is kept sorted at all times.
///
/// # Examples
///
/// ```
/// use conductor::domain::models::TaskQueue;
///
/// let mut queue = TaskQueue::new();
/// queue.enqueue("low", 1);
/// queue.enqueue("critical", 4);
/// queue.enqueue("high", 3);
/// queue.enqueue("critical again", 4);
///
/// assert_eq!(queue.dequeue(), Some("critical"));
/// assert_eq!(queue.dequeue(), Some("critical again"));
/// assert_eq!(queue.dequeue(), Some("high"));
/// assert_eq!(queue.dequeue(), Some("low"));
/// ```
#[derive(Debug, Clone)]
pub struct TaskQueue<T> {
    items: VecDeque<QueueItem<T>>,
    next_sequence: u64,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    #[allow(clippy::missing_const_for_fn)]
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            next_sequence: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            next_sequence: 0,
        }
    }

    /// Adds an item and returns its insertion sequence number.
    ///
    /// The item lands after every entry of greater or equal priority, which
    /// is exactly its FIFO position within its class.
    pub fn enqueue(&mut self, item: T, priority: u8) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let position = self.items.partition_point(|existing| existing.priority >= priority);
        self.items.insert(
            position,
            QueueItem {
                priority,
                sequence,
                item,
            },
        );
        sequence
    }

    /// Removes and returns the highest priority item.
    pub fn dequeue(&mut self) -> Option<T> {
        self.items.pop_front().map(|entry| entry.item)
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.front().map(|entry| &entry.item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|entry| &entry.item)
    }

    /// Entries in dispatch order, with their priority and sequence.
    pub fn entries(&self) -> impl Iterator<Item = &QueueItem<T>> {
        self.items.iter()
    }

    /// Removes the first item matching `predicate`, keeping the rest in order.
    pub fn remove_first<F>(&mut self, predicate: F) -> Option<T>
    where
        F: Fn(&T) -> bool,
    {
        let index = self.items.iter().position(|entry| predicate(&entry.item))?;
        self.items.remove(index).map(|entry| entry.item)
    }

    /// Removes every item, returning them in dispatch order.
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).map(|entry| entry.item).collect()
    }

    /// True when every adjacent pair is in dispatch order.
    pub fn is_ordered(&self) -> bool {
        self.items
            .iter()
            .zip(self.items.iter().skip(1))
            .all(|(a, b)| a.precedes(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_queue_is_empty() {
        let queue: TaskQueue<i32> = TaskQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
        assert!(queue.peek().is_none());
    }

    #[test]
    fn test_priority_ordering() {
        let mut queue = TaskQueue::new();
        queue.enqueue("low", 1);
        queue.enqueue("critical", 4);
        queue.enqueue("high", 3);

        assert_eq!(queue.dequeue(), Some("critical"));
        assert_eq!(queue.dequeue(), Some("high"));
        assert_eq!(queue.dequeue(), Some("low"));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_fifo_ordering_for_equal_priority() {
        let mut queue = TaskQueue::new();
        for i in 0..5 {
            queue.enqueue(i, 2);
        }
        let drained = queue.drain();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_late_high_priority_jumps_ahead_of_waiting_items() {
        let mut queue = TaskQueue::new();
        queue.enqueue("m1", 2);
        queue.enqueue("m2", 2);
        queue.enqueue("c1", 4);
        queue.enqueue("m3", 2);
        queue.enqueue("c2", 4);

        assert!(queue.is_ordered());
        let order: Vec<_> = queue.iter().copied().collect();
        assert_eq!(order, vec!["c1", "c2", "m1", "m2", "m3"]);
    }

    #[test]
    fn test_sequences_are_monotonic() {
        let mut queue = TaskQueue::new();
        let a = queue.enqueue('a', 1);
        let b = queue.enqueue('b', 4);
        let c = queue.enqueue('c', 1);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_remove_first_keeps_order() {
        let mut queue = TaskQueue::new();
        queue.enqueue(1, 1);
        queue.enqueue(2, 3);
        queue.enqueue(3, 1);

        assert_eq!(queue.remove_first(|x| *x == 2), Some(2));
        assert_eq!(queue.remove_first(|x| *x == 42), None);
        assert!(queue.is_ordered());
        assert_eq!(queue.drain(), vec![1, 3]);
    }

    #[test]
    fn test_peek_does_not_remove() {
        let mut queue = TaskQueue::new();
        queue.enqueue("only", 1);
        assert_eq!(queue.peek(), Some(&"only"));
        assert_eq!(queue.len(), 1);
    }
}
