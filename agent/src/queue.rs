//! In-memory delivery queue.
//!
//! Holds serialized records between a failed/deferred send and a successful
//! handoff to the transport. Strict FIFO, unbounded, memory-resident only;
//! anything still queued at teardown is lost (best-effort delivery). The
//! session task owns the queue exclusively, so no locking is needed.

use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct DeliveryQueue {
    entries: VecDeque<String>,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a serialized record behind all existing entries.
    pub fn push(&mut self, payload: String) {
        self.entries.push_back(payload);
    }

    /// Restore an entry whose handoff failed. It stays ahead of everything
    /// queued after it, preserving submission order for the next drain.
    pub fn push_front(&mut self, payload: String) {
        self.entries.push_front(payload);
    }

    /// Oldest entry, removed.
    pub fn pop(&mut self) -> Option<String> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
