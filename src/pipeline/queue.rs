//! Bounded resource pools: a slot counter plus a FIFO of deferred requests.
//!
//! Pools are owned by the orchestrator thread, so admission and release are plain `&mut self`
//! calls. `release` hands a freed slot straight to the oldest queued request in the same call,
//! which is what keeps a slot from sitting idle while work waits.

use std::collections::VecDeque;

/// FIFO of deferred requests for one pool.
#[derive(Debug)]
pub struct TaskQueue<A> {
    items: VecDeque<A>,
}

impl<A> Default for TaskQueue<A> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<A> TaskQueue<A> {
    pub fn push(&mut self, item: A) {
        self.items.push_back(item);
    }

    pub fn pop(&mut self) -> Option<A> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every queued request; returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }
}

/// A capped pool of slots with its own wait queue.
#[derive(Debug)]
pub struct Pool<A> {
    name: &'static str,
    cap: usize,
    active: usize,
    peak: usize,
    queue: TaskQueue<A>,
}

impl<A> Pool<A> {
    /// New pool; a cap of 0 is treated as 1.
    pub fn new(name: &'static str, cap: usize) -> Self {
        Self {
            name,
            cap: cap.max(1),
            active: 0,
            peak: 0,
            queue: TaskQueue::default(),
        }
    }

    /// Take a slot for `req` if one is free and nothing is waiting ahead of it.
    /// Returns `Some(req)` when the caller must start it now; `None` when it was queued.
    pub fn admit(&mut self, req: A) -> Option<A> {
        if self.active < self.cap && self.queue.is_empty() {
            self.active += 1;
            self.peak = self.peak.max(self.active);
            Some(req)
        } else {
            self.queue.push(req);
            None
        }
    }

    /// Give back one slot. If a request is queued the slot passes directly to it and it is
    /// returned for the caller to start; the active count is unchanged in that case.
    pub fn release(&mut self) -> Option<A> {
        debug_assert!(self.active > 0, "{} pool released with no active slot", self.name);
        match self.queue.pop() {
            Some(next) => Some(next),
            None => {
                self.active = self.active.saturating_sub(1);
                None
            }
        }
    }

    /// Drop queued requests (active ones keep their slots until released).
    pub fn clear(&mut self) -> usize {
        self.queue.clear()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Active plus queued.
    pub fn total(&self) -> usize {
        self.active + self.queue.len()
    }

    /// Highest number of simultaneously active slots seen since creation.
    pub fn peak(&self) -> usize {
        self.peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_cap_then_queues() {
        let mut pool = Pool::new("test", 2);
        assert_eq!(pool.admit(1), Some(1));
        assert_eq!(pool.admit(2), Some(2));
        assert_eq!(pool.admit(3), None);
        assert_eq!(pool.admit(4), None);
        assert_eq!(pool.active(), 2);
        assert_eq!(pool.queued(), 2);
        assert_eq!(pool.total(), 4);
    }

    #[test]
    fn release_hands_slot_to_oldest_waiter() {
        let mut pool = Pool::new("test", 1);
        assert_eq!(pool.admit("a"), Some("a"));
        assert_eq!(pool.admit("b"), None);
        assert_eq!(pool.admit("c"), None);
        assert_eq!(pool.release(), Some("b"));
        assert_eq!(pool.active(), 1);
        assert_eq!(pool.release(), Some("c"));
        assert_eq!(pool.release(), None);
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.peak(), 1);
    }

    #[test]
    fn zero_cap_behaves_as_one() {
        let mut pool = Pool::new("test", 0);
        assert_eq!(pool.cap(), 1);
        assert_eq!(pool.admit(()), Some(()));
        assert_eq!(pool.admit(()), None);
    }

    #[test]
    fn clear_keeps_active_slots() {
        let mut pool = Pool::new("test", 1);
        pool.admit(1);
        pool.admit(2);
        assert_eq!(pool.clear(), 1);
        assert_eq!(pool.total(), 1);
        assert_eq!(pool.release(), None);
        assert_eq!(pool.total(), 0);
    }
}
