use conductor::domain::models::{TaskPriority, TaskQueue};
use proptest::prelude::*;
use test_strategy::proptest as strategy_proptest;

fn priority() -> impl Strategy<Value = TaskPriority> {
    prop_oneof![
        Just(TaskPriority::Low),
        Just(TaskPriority::Medium),
        Just(TaskPriority::High),
        Just(TaskPriority::Critical),
    ]
}

proptest! {
    /// Property: dequeue order is priority-descending with FIFO ties
    ///
    /// Draining the queue must yield exactly the enqueued items sorted by
    /// rank (highest first), and by insertion index within a rank.
    #[test]
    fn prop_dequeue_order_is_priority_then_fifo(
        priorities in prop::collection::vec(priority(), 0..64)
    ) {
        let mut queue = TaskQueue::new();
        for (index, p) in priorities.iter().enumerate() {
            queue.enqueue(index, p.rank());
        }
        prop_assert!(queue.is_ordered());

        let mut expected: Vec<usize> = (0..priorities.len()).collect();
        expected.sort_by_key(|&i| (std::cmp::Reverse(priorities[i].rank()), i));

        let mut drained = Vec::new();
        while let Some(index) = queue.dequeue() {
            drained.push(index);
        }
        prop_assert_eq!(drained, expected);
        prop_assert!(queue.is_empty());
    }

    /// Property: removing an arbitrary item keeps the rest ordered
    #[test]
    fn prop_remove_keeps_order(
        priorities in prop::collection::vec(priority(), 1..32),
        victim in any::<prop::sample::Index>()
    ) {
        let mut queue = TaskQueue::new();
        for (index, p) in priorities.iter().enumerate() {
            queue.enqueue(index, p.rank());
        }
        let target = victim.index(priorities.len());

        prop_assert_eq!(queue.remove_first(|&i| i == target), Some(target));
        prop_assert_eq!(queue.len(), priorities.len() - 1);
        prop_assert!(queue.is_ordered());
        prop_assert!(queue.iter().all(|&i| i != target));
    }
}

/// Property: interleaved enqueue and dequeue never returns a lower rank
/// while a higher one is waiting.
#[strategy_proptest]
fn prop_interleaved_dequeue_returns_highest_waiting(
    #[strategy(prop::collection::vec((0u8..5, any::<bool>()), 1..80))] ops: Vec<(u8, bool)>,
) {
    let mut queue = TaskQueue::new();
    let mut waiting: Vec<u8> = Vec::new();
    for (rank, dequeue_after) in ops {
        queue.enqueue(rank, rank);
        waiting.push(rank);
        if dequeue_after {
            let highest = waiting.iter().copied().max();
            let got = queue.dequeue();
            prop_assert_eq!(got, highest);
            if let Some(pos) = waiting.iter().position(|&r| Some(r) == got) {
                waiting.remove(pos);
            }
        }
    }
    prop_assert_eq!(queue.len(), waiting.len());
}
