//! Deadline-ordered queue of idle services

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// An idle service together with the instant it stops being reusable
#[derive(Debug)]
pub struct TtlEntry<S> {
    pub service: S,
    pub deadline: Instant,
}

/// Capacity-bounded FIFO of idle services.
///
/// Entries are only ever appended at the tail with `deadline = now + ttl`,
/// and the pool feeds it non-decreasing `now` values under its lock, so the
/// head is always the next entry to expire.
#[derive(Debug)]
pub struct CacheQueue<S> {
    entries: VecDeque<TtlEntry<S>>,
    capacity: usize,
}

impl<S> CacheQueue<S> {
    /// `None` means unbounded
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.unwrap_or(usize::MAX),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Append at the tail. The caller has already checked `is_full`.
    pub fn enqueue(&mut self, service: S, now: Instant, ttl: Duration) -> Instant {
        debug_assert!(!self.is_full(), "enqueue into a full cache queue");
        let deadline = now + ttl;
        debug_assert!(
            self.entries.back().map_or(true, |tail| tail.deadline <= deadline),
            "cache queue deadlines must be non-decreasing"
        );
        self.entries.push_back(TtlEntry { service, deadline });
        deadline
    }

    pub fn dequeue_head(&mut self) -> Option<S> {
        self.entries.pop_front().map(|entry| entry.service)
    }

    pub fn peek_deadline(&self) -> Option<Instant> {
        self.entries.front().map(|entry| entry.deadline)
    }

    /// Remove every entry from the head whose deadline is at or before `now`
    pub fn dequeue_expired(&mut self, now: Instant) -> Vec<S> {
        let mut expired = Vec::new();
        while self.peek_deadline().map_or(false, |deadline| deadline <= now) {
            if let Some(service) = self.dequeue_head() {
                expired.push(service);
            }
        }
        expired
    }

    pub fn drain(&mut self) -> Vec<S> {
        self.entries.drain(..).map(|entry| entry.service).collect()
    }

    pub fn deadlines(&self) -> impl Iterator<Item = Instant> + '_ {
        self.entries.iter().map(|entry| entry.deadline)
    }
}
