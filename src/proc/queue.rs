//! The six fixed-priority ready queues.
//!
//! One FIFO per priority, priority `1` scanned first (highest urgency),
//! priority [`crate::config::INIT_PRIORITY`] reserved for the bootstrap
//! process so it only runs when nothing else is ready.

use std::collections::VecDeque;

use crate::config::NUM_PRIORITIES;

pub struct PriorityQueues {
    queues: [VecDeque<usize>; NUM_PRIORITIES],
}

impl PriorityQueues {
    pub fn new() -> Self {
        PriorityQueues {
            queues: Default::default(),
        }
    }

    fn index(priority: u32) -> usize {
        debug_assert!((1..=NUM_PRIORITIES as u32).contains(&priority));
        priority as usize - 1
    }

    pub fn push_back(&mut self, priority: u32, slot: usize) {
        self.queues[Self::index(priority)].push_back(slot);
    }

    /// Remove the front-most slot of the highest-urgency non-empty queue
    /// (lowest priority number first), returning `(slot, priority)`.
    pub fn pop_front_highest(&mut self) -> Option<(usize, u32)> {
        for (idx, q) in self.queues.iter_mut().enumerate() {
            if let Some(slot) = q.pop_front() {
                return Some((slot, idx as u32 + 1));
            }
        }
        None
    }

    /// Remove a specific slot wherever it sits in its queue (used when a
    /// process is zapped or reparented out of band). Returns whether it
    /// was found.
    pub fn remove(&mut self, slot: usize) -> bool {
        for q in &mut self.queues {
            if let Some(pos) = q.iter().position(|&s| s == slot) {
                q.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }
}
