//! Scheduling of delayed callbacks
//!
//! The pool never sleeps itself. It asks a `Timer` to run a callback at a
//! given instant and keeps the returned `TimerTask` so the callback can be
//! cancelled if it is no longer needed.

pub mod mock;

use std::fmt;

use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::error::{Error, Result};

pub use mock::MockTimer;

/// Callback run by a `Timer` when its instant is reached
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Source of time and delayed execution
pub trait Timer: Send + Sync + 'static {
    /// Current time as seen by this timer
    fn now(&self) -> Instant;

    /// Run `callback` once `when` has been reached
    fn schedule_at(&self, when: Instant, callback: TimerCallback) -> TimerTask;
}

/// Handle to a scheduled callback.
///
/// Dropping the handle leaves the callback armed; call `cancel` to disarm it.
pub struct TimerTask {
    canceller: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TimerTask {
    pub fn new(canceller: impl FnOnce() + Send + 'static) -> Self {
        Self {
            canceller: Some(Box::new(canceller)),
        }
    }

    /// Cancel the callback if it has not fired yet
    pub fn cancel(mut self) {
        if let Some(cancel) = self.canceller.take() {
            cancel();
        }
    }
}

impl fmt::Debug for TimerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerTask").finish_non_exhaustive()
    }
}

/// Timer backed by the Tokio runtime: one sleeping task per callback
#[derive(Clone)]
pub struct TokioTimer {
    runtime: Handle,
}

impl TokioTimer {
    /// Build a timer bound to the runtime of the calling context
    pub fn current() -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("TokioTimer needs a running Tokio runtime: {}", e)))?;
        Ok(Self { runtime })
    }
}

impl Timer for TokioTimer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule_at(&self, when: Instant, callback: TimerCallback) -> TimerTask {
        let task = self.runtime.spawn(async move {
            tokio::time::sleep_until(when).await;
            callback();
        });
        TimerTask::new(move || task.abort())
    }
}
