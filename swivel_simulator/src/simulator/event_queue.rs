//! Scheduled scenario actions, ordered by tick

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::scenario::Action;

/// An action due at `tick`. `seq` keeps same-tick actions in script order.
#[derive(Debug, Clone)]
pub struct SimEvent {
    pub tick: u64,
    pub seq: usize,
    pub action: Action,
}

impl PartialEq for SimEvent {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick && self.seq == other.seq
    }
}
impl Eq for SimEvent {}
impl PartialOrd for SimEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for SimEvent {
    // reversed: BinaryHeap is a max-heap, the earliest event must pop first
    fn cmp(&self, other: &Self) -> Ordering {
        other.tick.cmp(&self.tick).then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
pub struct SimEventQueue {
    queue: BinaryHeap<SimEvent>,
    next_seq: usize,
}

impl SimEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tick: u64, action: Action) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(SimEvent { tick, seq, action });
    }

    /// Pop the next event if it is due at or before `tick`.
    pub fn pop_due(&mut self, tick: u64) -> Option<SimEvent> {
        if self.queue.peek()?.tick <= tick {
            self.queue.pop()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
