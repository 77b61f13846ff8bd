//! Fire-and-forget closing of services the pool no longer wants

use std::fmt;
use std::future::Future;

use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::Result;

/// Why a service is being closed instead of cached or handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    /// Sat idle past its deadline
    Expired,
    /// Failed its health check on release
    Unhealthy,
    /// Released while the cache was already full
    OverCapacity,
    /// Released after the pool was closed
    AfterClose,
    /// Still cached when the pool was closed
    Drained,
    /// Created for an acquire whose caller had already gone away
    Orphaned,
}

impl fmt::Display for Disposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Disposal::Expired => "expired",
            Disposal::Unhealthy => "unhealthy",
            Disposal::OverCapacity => "over capacity",
            Disposal::AfterClose => "pool closed",
            Disposal::Drained => "drained",
            Disposal::Orphaned => "orphaned",
        };
        f.write_str(reason)
    }
}

/// Runs close futures in the background and lets shutdown wait for them.
///
/// Failures are logged and dropped: nobody is waiting on these results.
pub struct Disposals {
    runtime: Handle,
    tracker: TaskTracker,
}

impl Disposals {
    pub fn new(runtime: Handle) -> Self {
        let tracker = TaskTracker::new();
        // closed up front so `wait` completes whenever nothing is in flight
        tracker.close();
        Self { runtime, tracker }
    }

    pub fn spawn<F>(&self, reason: Disposal, close: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tracker.spawn_on(
            async move {
                match close.await {
                    Ok(()) => debug!("closed service ({})", reason),
                    Err(e) => warn!("failed to close service ({}): {}", reason, e),
                }
            },
            &self.runtime,
        );
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Resolves once no close is in flight
    pub async fn settled(&self) {
        self.tracker.wait().await
    }
}
