//! A scheduling tree that lets the event loop ask "what's the soonest
//! this group needs attention?" in O(1) instead of scanning every
//! in-flight probe on each iteration.
//!
//! Grounded on `libparistraceroute/group.c`: a `probe_group_t` is a
//! binary tree whose leaves hold a probe and whose interior nodes cache
//! the minimum delay among their children, updated on insert/delete so
//! the root always answers "soonest" without a traversal. This crate
//! flattens that into a min-heap over `(deadline, probe)` pairs — same
//! amortized behavior, without hand-rolling tree rebalancing in Rust
//! where `BinaryHeap` already does it. A probe's scheduled delay is
//! resolved to a wall-clock `Instant` once, at insertion, so the event
//! loop can compare heap entries against `Instant::now()` directly
//! instead of re-deriving "time remaining" from a static offset on
//! every poll.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use crate::probe::Probe;

struct Entry {
    deadline: Reverse<Instant>,
    probe: Probe,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

/// A set of probes waiting for their scheduled send time, ordered by
/// deadline so the soonest is always at the root.
#[derive(Default)]
pub struct ProbeGroup {
    heap: BinaryHeap<Entry>,
}

impl ProbeGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, probe: Probe) {
        let delay = probe.next_delay().max(0.0);
        let deadline = Instant::now() + Duration::from_secs_f64(delay);
        self.heap.push(Entry { deadline: Reverse(deadline), probe });
    }

    /// The soonest deadline among all queued probes, or `None` if empty.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline.0)
    }

    /// Removes and returns the probe with the soonest deadline.
    pub fn pop_next(&mut self) -> Option<Probe> {
        self.heap.pop().map(|e| e.probe)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::Generator;

    #[test]
    fn pop_next_returns_soonest_first() {
        let mut group = ProbeGroup::new();
        let mut a = Probe::create();
        a.delay = Some(Generator::Fixed(2.0));
        let mut b = Probe::create();
        b.delay = Some(Generator::Fixed(0.01));
        group.insert(a);
        group.insert(b);
        let first = group.pop_next().unwrap();
        assert_eq!(first.next_delay(), 0.01);
        let second = group.pop_next().unwrap();
        assert_eq!(second.next_delay(), 2.0);
        assert!(group.is_empty());
    }
}
