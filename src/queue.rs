use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use crate::event::{Event, ThreadId};

/// One thread's events in chronological replay order.
#[derive(Debug, Default)]
pub struct ThreadQueue {
    heap: BinaryHeap<Reverse<Event>>,
}

impl ThreadQueue {
    pub fn push(&mut self, event: Event) {
        self.heap.push(Reverse(event));
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|Reverse(e)| e)
    }

    pub fn peek(&self) -> Option<&Event> {
        self.heap.peek().map(|Reverse(e)| e)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Per-thread priority queues. Populated once by the event generator;
/// afterwards each thread's queue is drained by exactly one analysis
/// chain.
#[derive(Debug, Default)]
pub struct ThreadQueues {
    queues: BTreeMap<ThreadId, ThreadQueue>,
}

impl ThreadQueues {
    pub fn new() -> Self {
        ThreadQueues {
            queues: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, event: Event) {
        self.queues
            .entry(event.thread_id)
            .or_default()
            .push(event);
    }

    pub fn pop(&mut self, thread_id: ThreadId) -> Option<Event> {
        self.queues.get_mut(&thread_id).and_then(|q| q.pop())
    }

    pub fn peek(&self, thread_id: ThreadId) -> Option<&Event> {
        self.queues.get(&thread_id).and_then(|q| q.peek())
    }

    pub fn is_empty(&self, thread_id: ThreadId) -> bool {
        self.queues.get(&thread_id).map_or(true, |q| q.is_empty())
    }

    pub fn threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.queues.keys().copied()
    }

    pub fn total_len(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }

    /// Split into independently owned per-thread queues, in thread order,
    /// so chains can drain them without sharing.
    pub fn into_threads(self) -> Vec<(ThreadId, ThreadQueue)> {
        self.queues.into_iter().collect()
    }
}
