//! Timer registry: a min-heap of one-shot and periodic records, owned
//! exclusively by the loop thread.
//!
//! Entries are ordered by deadline with an insertion-sequence tie-break so
//! same-deadline timers fire in submission order. Periodic entries carry the
//! generation they were armed under; a stop bumps the watcher's generation
//! and the stale entry is discarded when it surfaces (lazy cancellation).

use crate::task::Task;
use crate::watcher::Ticker;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;

pub(crate) enum TimerKind {
    /// One-shot record; removed from the registry before its task runs.
    Once(Task),

    /// Periodic tick. Holds a strong reference to the ticker core so an
    /// armed watcher outlives a dropped external handle.
    Tick {
        ticker: Arc<Ticker>,
        generation: u64,
    },
}

pub(crate) struct TimerEntry {
    pub(crate) deadline: Instant,
    seq: u64,
    pub(crate) kind: TimerKind,
}

// Reverse ordering so `BinaryHeap` behaves as a min-heap: earliest deadline
// first, then earliest insertion.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

/// Active timers, earliest deadline on top.
pub(crate) struct TimerHeap {
    entries: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self {
            entries: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn push(&mut self, deadline: Instant, kind: TimerKind) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.entries.push(TimerEntry {
            deadline,
            seq,
            kind,
        });
    }

    /// Pop the earliest entry whose deadline has passed, if any.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<TimerEntry> {
        if self.entries.peek()?.deadline <= now {
            self.entries.pop()
        } else {
            None
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.peek().map(|entry| entry.deadline)
    }

    /// Empty the registry, handing the entries back for teardown.
    pub(crate) fn take_entries(&mut self) -> BinaryHeap<TimerEntry> {
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn once(tag: u32, order: &std::sync::Arc<parking_lot::Mutex<Vec<u32>>>) -> TimerKind {
        let order = std::sync::Arc::clone(order);
        TimerKind::Once(Box::new(move || order.lock().push(tag)))
    }

    fn run_once(entry: TimerEntry) {
        match entry.kind {
            TimerKind::Once(task) => task(),
            TimerKind::Tick { .. } => panic!("expected a one-shot entry"),
        }
    }

    #[test]
    fn test_orders_by_deadline() {
        let order = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut heap = TimerHeap::new();
        let now = Instant::now();

        heap.push(now + Duration::from_millis(30), once(3, &order));
        heap.push(now + Duration::from_millis(10), once(1, &order));
        heap.push(now + Duration::from_millis(20), once(2, &order));

        let late = now + Duration::from_millis(100);
        while let Some(entry) = heap.pop_due(late) {
            run_once(entry);
        }
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_same_deadline_fires_in_submission_order() {
        let order = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut heap = TimerHeap::new();
        let deadline = Instant::now() + Duration::from_millis(5);

        for tag in 1..=4 {
            heap.push(deadline, once(tag, &order));
        }

        let late = deadline + Duration::from_millis(1);
        while let Some(entry) = heap.pop_due(late) {
            run_once(entry);
        }
        assert_eq!(*order.lock(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_pop_due_leaves_future_entries() {
        let order = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut heap = TimerHeap::new();
        let now = Instant::now();

        heap.push(now, once(1, &order));
        heap.push(now + Duration::from_secs(60), once(2, &order));

        assert!(heap.pop_due(now).is_some());
        assert!(heap.pop_due(now).is_none());
        assert_eq!(heap.next_deadline(), Some(now + Duration::from_secs(60)));
    }
}
