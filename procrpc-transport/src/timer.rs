//! Time-ordered queue of deferred actions.
//!
//! Events fire in trigger order, FIFO among equal trigger times. Cancelled
//! events are dropped lazily when they reach the head of the heap.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;

/// Handle returned by `schedule`, used to cancel an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// A pending deferred action.
#[derive(Debug)]
pub struct TimerEvent<A> {
    trigger_at: Instant,
    seq: u64,
    action: A,
}

impl<A> TimerEvent<A> {
    pub fn trigger_at(&self) -> Instant {
        self.trigger_at
    }

    pub fn action(&self) -> &A {
        &self.action
    }
}

impl<A> PartialEq for TimerEvent<A> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<A> Eq for TimerEvent<A> {}

impl<A> PartialOrd for TimerEvent<A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<A> Ord for TimerEvent<A> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.trigger_at, self.seq).cmp(&(other.trigger_at, other.seq))
    }
}

pub struct TimerQueue<A> {
    heap: BinaryHeap<Reverse<TimerEvent<A>>>,
    pending: HashSet<u64>,
    next_seq: u64,
}

impl<A> TimerQueue<A> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashSet::new(),
            next_seq: 0,
        }
    }

    pub fn schedule(&mut self, trigger_at: Instant, action: A) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(seq);
        self.heap.push(Reverse(TimerEvent {
            trigger_at,
            seq,
            action,
        }));
        TimerHandle(seq)
    }

    /// Cancels a pending event. Returns false if it already fired or was
    /// cancelled before.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.pending.remove(&handle.0)
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pending.contains(&handle.0)
    }

    /// Trigger time of the earliest pending event.
    pub fn earliest_deadline(&mut self) -> Option<Instant> {
        self.discard_cancelled();
        self.heap.peek().map(|Reverse(event)| event.trigger_at)
    }

    /// Removes and returns every event due at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<A> {
        let mut fired = Vec::new();
        while let Some(Reverse(head)) = self.heap.peek() {
            if head.trigger_at > now {
                break;
            }
            if let Some(Reverse(event)) = self.heap.pop() {
                if self.pending.remove(&event.seq) {
                    fired.push(event.action);
                }
            }
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse(head)) = self.heap.peek() {
            if self.pending.contains(&head.seq) {
                break;
            }
            self.heap.pop();
        }
    }
}

impl<A> Default for TimerQueue<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pop_in_trigger_order() {
        let base = Instant::now();
        let mut queue = TimerQueue::new();
        queue.schedule(base + Duration::from_millis(30), "c");
        queue.schedule(base + Duration::from_millis(10), "a");
        queue.schedule(base + Duration::from_millis(20), "b");

        assert_eq!(queue.earliest_deadline(), Some(base + Duration::from_millis(10)));
        assert_eq!(queue.pop_expired(base + Duration::from_millis(25)), vec!["a", "b"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_expired(base + Duration::from_millis(30)), vec!["c"]);
        assert!(queue.is_empty());
        assert_eq!(queue.earliest_deadline(), None);
    }

    #[test]
    fn test_ties_fire_in_insertion_order() {
        let at = Instant::now();
        let mut queue = TimerQueue::new();
        for i in 0..5 {
            queue.schedule(at, i);
        }
        assert_eq!(queue.pop_expired(at), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_nothing_before_deadline() {
        let base = Instant::now();
        let mut queue = TimerQueue::new();
        queue.schedule(base + Duration::from_secs(1), ());
        assert!(queue.pop_expired(base).is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_cancelled_never_fires() {
        let base = Instant::now();
        let mut queue = TimerQueue::new();
        let first = queue.schedule(base, 1);
        let second = queue.schedule(base + Duration::from_millis(5), 2);

        assert!(queue.cancel(first));
        assert!(!queue.cancel(first));
        assert!(!queue.is_pending(first));
        assert!(queue.is_pending(second));
        assert_eq!(queue.earliest_deadline(), Some(base + Duration::from_millis(5)));
        assert_eq!(queue.pop_expired(base + Duration::from_secs(1)), vec![2]);
    }

    #[test]
    fn test_fires_exactly_once() {
        let base = Instant::now();
        let mut queue = TimerQueue::new();
        let handle = queue.schedule(base, 'x');
        assert_eq!(queue.pop_expired(base), vec!['x']);
        assert!(queue.pop_expired(base + Duration::from_secs(1)).is_empty());
        assert!(!queue.cancel(handle));
    }
}
