//! Manually driven timer for deterministic tests and simulations

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use super::{Timer, TimerCallback, TimerTask};

struct MockInner {
    now: Instant,
    next_id: u64,
    // keyed by (deadline, id) so equal deadlines fire in scheduling order
    tasks: BTreeMap<(Instant, u64), TimerCallback>,
}

/// A clock that only moves when told to.
///
/// `advance` runs every callback whose deadline has been reached, in deadline
/// order. Callbacks run without the timer lock held, so they may schedule or
/// cancel further tasks; newly scheduled tasks that are already due run in
/// the same `advance` call.
#[derive(Clone)]
pub struct MockTimer {
    inner: Arc<Mutex<MockInner>>,
}

impl MockTimer {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockInner {
                now,
                next_id: 0,
                tasks: BTreeMap::new(),
            })),
        }
    }

    /// Move the clock forward and fire everything that became due
    pub fn advance(&self, by: Duration) {
        let target = {
            let mut inner = self.inner.lock();
            inner.now += by;
            inner.now
        };
        trace!("mock timer advanced by {:?}", by);
        self.fire_due(target);
    }

    /// Number of callbacks still armed
    pub fn pending(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    /// Earliest armed deadline, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.lock().tasks.keys().next().map(|(when, _)| *when)
    }

    fn fire_due(&self, now: Instant) {
        loop {
            let due = {
                let mut inner = self.inner.lock();
                match inner.tasks.keys().next().copied() {
                    Some(key) if key.0 <= now => inner.tasks.remove(&key),
                    _ => None,
                }
            };
            match due {
                Some(callback) => callback(),
                None => break,
            }
        }
    }
}

impl Default for MockTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for MockTimer {
    fn now(&self) -> Instant {
        self.inner.lock().now
    }

    fn schedule_at(&self, when: Instant, callback: TimerCallback) -> TimerTask {
        let key = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.tasks.insert((when, id), callback);
            (when, id)
        };
        let weak = Arc::downgrade(&self.inner);
        TimerTask::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().tasks.remove(&key);
            }
        })
    }
}
