//! Single outstanding reap task for a cache queue

use tokio::time::Instant;
use tracing::trace;

use crate::timer::{Timer, TimerTask};

struct Armed {
    generation: u64,
    deadline: Instant,
    task: TimerTask,
}

/// Tracks the one timer callback that sweeps expired entries.
///
/// Every arm gets a fresh generation number. A callback that fires after it
/// was superseded (cancelled too late, or replaced by a re-arm) finds a
/// different generation and does nothing.
#[derive(Default)]
pub struct Reaper {
    armed: Option<Armed>,
    next_generation: u64,
}

impl Reaper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn armed_deadline(&self) -> Option<Instant> {
        self.armed.as_ref().map(|armed| armed.deadline)
    }

    /// Schedule `on_fire(generation)` at `deadline`, replacing any armed task
    pub fn arm<F>(&mut self, timer: &dyn Timer, deadline: Instant, on_fire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.disarm();
        let generation = self.next_generation;
        self.next_generation += 1;
        let task = timer.schedule_at(deadline, Box::new(move || on_fire(generation)));
        trace!("reaper armed (generation {})", generation);
        self.armed = Some(Armed {
            generation,
            deadline,
            task,
        });
    }

    pub fn disarm(&mut self) {
        if let Some(armed) = self.armed.take() {
            trace!("reaper disarmed (generation {})", armed.generation);
            armed.task.cancel();
        }
    }

    /// Called from a firing callback. Returns true and forgets the task if
    /// `generation` is the one currently armed.
    pub fn fired(&mut self, generation: u64) -> bool {
        match &self.armed {
            Some(armed) if armed.generation == generation => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }
}
