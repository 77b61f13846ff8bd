//! Caching layer in front of a `ServiceFactory`
//!
//! Released services that are still healthy are parked in a deadline-ordered
//! queue for `ttl` and handed back out on the next acquire instead of
//! creating a new one. A single reap task, armed for the head of the queue,
//! closes whatever sits idle past its deadline.
//!
//! The queue, the reap task and the closed flag live behind one mutex. At any
//! instant a service belongs to exactly one of: a caller (inside a
//! `Pooled`), the queue, or a creation still in flight inside the factory.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::disposal::{Disposal, Disposals};
use super::pooled::Pooled;
use super::queue::CacheQueue;
use super::reaper::Reaper;
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::service::{Service, ServiceFactory};
use crate::timer::Timer;

struct State<S> {
    queue: CacheQueue<S>,
    reaper: Reaper,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    reused: AtomicU64,
    expired: AtomicU64,
    unhealthy: AtomicU64,
    over_capacity: AtomicU64,
    after_close: AtomicU64,
    drained: AtomicU64,
    orphaned: AtomicU64,
}

impl Counters {
    fn record(&self, reason: Disposal) {
        let counter = match reason {
            Disposal::Expired => &self.expired,
            Disposal::Unhealthy => &self.unhealthy,
            Disposal::OverCapacity => &self.over_capacity,
            Disposal::AfterClose => &self.after_close,
            Disposal::Drained => &self.drained,
            Disposal::Orphaned => &self.orphaned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of pool activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub cached: usize,
    pub created: u64,
    pub reused: u64,
    pub expired: u64,
    pub unhealthy: u64,
    pub over_capacity: u64,
    pub after_close: u64,
    pub drained: u64,
    pub orphaned: u64,
}

pub(crate) struct Shared<F: ServiceFactory> {
    factory: Arc<F>,
    timer: Arc<dyn Timer>,
    runtime: Handle,
    ttl: Duration,
    close_timeout: Duration,
    state: Mutex<State<F::Service>>,
    disposals: Disposals,
    counters: Counters,
}

impl<F: ServiceFactory> Shared<F> {
    fn dispose(&self, service: F::Service, reason: Disposal) {
        debug!("closing service ({})", reason);
        self.counters.record(reason);
        let deadline = self.timer.now() + self.close_timeout;
        self.disposals
            .spawn(reason, async move { service.close(deadline).await });
    }

    fn arm_reaper(self: &Arc<Self>, reaper: &mut Reaper, deadline: Instant) {
        let pool = Arc::downgrade(self);
        reaper.arm(self.timer.as_ref(), deadline, move |generation| {
            Self::reap(&pool, generation)
        });
    }

    /// Timer callback: close every expired entry and re-arm for the new head
    fn reap(pool: &Weak<Self>, generation: u64) {
        let Some(shared) = pool.upgrade() else {
            return;
        };
        let expired = {
            let mut state = shared.state.lock();
            if !state.reaper.fired(generation) {
                return;
            }
            let now = shared.timer.now();
            let expired = state.queue.dequeue_expired(now);
            if let Some(next) = state.queue.peek_deadline() {
                shared.arm_reaper(&mut state.reaper, next);
            }
            expired
        };
        if !expired.is_empty() {
            debug!("reaped {} expired service(s)", expired.len());
        }
        for service in expired {
            shared.dispose(service, Disposal::Expired);
        }
    }

    fn release(self: &Arc<Self>, service: F::Service) {
        let mut state = self.state.lock();
        let reason = if state.closed {
            Disposal::AfterClose
        } else if !check_health(&service) {
            Disposal::Unhealthy
        } else if state.queue.is_full() {
            Disposal::OverCapacity
        } else {
            let was_empty = state.queue.is_empty();
            let now = self.timer.now();
            let deadline = state.queue.enqueue(service, now, self.ttl);
            if was_empty {
                self.arm_reaper(&mut state.reaper, deadline);
            }
            debug!("cached released service ({} idle)", state.queue.len());
            return;
        };
        drop(state);
        self.dispose(service, reason);
    }
}

/// Receiving end of a creation spawned by `acquire_or_interrupt`.
///
/// If the acquire goes away after the service was sent but before it was
/// received, the service is still sitting in the channel and gets closed here.
struct PendingCreation<F: ServiceFactory> {
    rx: oneshot::Receiver<Result<F::Service>>,
    shared: Arc<Shared<F>>,
}

impl<F: ServiceFactory> Drop for PendingCreation<F> {
    fn drop(&mut self) {
        // after this, a late send fails and the creating task disposes instead
        self.rx.close();
        if let Ok(Ok(orphan)) = self.rx.try_recv() {
            warn!("service delivered after its acquire was abandoned, closing it");
            self.shared.dispose(orphan, Disposal::Orphaned);
        }
    }
}

/// A panicking health check counts as unhealthy
fn check_health<S: Service>(service: &S) -> bool {
    catch_unwind(AssertUnwindSafe(|| service.is_healthy())).unwrap_or(false)
}

/// Caches idle services from a `ServiceFactory` for a fixed time-to-live.
///
/// Cloning is cheap; all clones share the same cache.
pub struct CachingPool<F: ServiceFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ServiceFactory> Clone for CachingPool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<F: ServiceFactory> CachingPool<F> {
    /// Must be called from within a Tokio runtime; background closes and
    /// creations are spawned onto it.
    pub fn new(factory: F, timer: Arc<dyn Timer>, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("CachingPool needs a running Tokio runtime: {}", e)))?;

        info!(
            "Creating caching pool (capacity: {}, ttl: {:?})",
            config
                .capacity
                .map_or_else(|| "unbounded".to_string(), |c| c.to_string()),
            config.ttl()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                factory: Arc::new(factory),
                timer,
                runtime: runtime.clone(),
                ttl: config.ttl(),
                close_timeout: config.close_timeout(),
                state: Mutex::new(State {
                    queue: CacheQueue::new(config.capacity),
                    reaper: Reaper::new(),
                    closed: false,
                }),
                disposals: Disposals::new(runtime),
                counters: Counters::default(),
            }),
        })
    }

    /// Hand out a cached service, or create a new one
    pub async fn acquire(&self) -> Result<Pooled<F>> {
        self.acquire_or_interrupt(std::future::pending::<String>())
            .await
    }

    /// Like `acquire`, but gives up with `Error::WriteInterrupted` carrying the
    /// cause if `interrupt` resolves before a new service has been created.
    ///
    /// The creation itself keeps running. If it succeeds after the caller has
    /// gone (interrupted, or the returned future dropped) the service is
    /// closed, since nobody owns it.
    pub async fn acquire_or_interrupt<I>(&self, interrupt: I) -> Result<Pooled<F>>
    where
        I: Future<Output = String>,
    {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(Error::ServiceClosed);
            }
            if let Some(service) = state.queue.dequeue_head() {
                match state.queue.peek_deadline() {
                    None => state.reaper.disarm(),
                    Some(next) if state.reaper.armed_deadline() != Some(next) => {
                        self.shared.arm_reaper(&mut state.reaper, next)
                    }
                    Some(_) => {}
                }
                drop(state);
                self.shared.counters.reused.fetch_add(1, Ordering::Relaxed);
                debug!("reusing cached service");
                return Ok(Pooled::new(service, self.clone()));
            }
        }

        let (tx, rx) = oneshot::channel();
        let shared = self.shared.clone();
        self.shared.runtime.spawn(async move {
            let created = shared.factory.create().await;
            if let Err(Ok(orphan)) = tx.send(created) {
                warn!("service created after its acquire was abandoned, closing it");
                shared.dispose(orphan, Disposal::Orphaned);
            }
        });
        let mut pending = PendingCreation {
            rx,
            shared: self.shared.clone(),
        };

        tokio::pin!(interrupt);
        tokio::select! {
            biased;
            created = &mut pending.rx => match created {
                Ok(Ok(service)) => {
                    self.shared.counters.created.fetch_add(1, Ordering::Relaxed);
                    debug!("created new service");
                    Ok(Pooled::new(service, self.clone()))
                }
                Ok(Err(e)) => {
                    debug!("service creation failed: {}", e);
                    Err(e)
                }
                Err(_) => Err(Error::ServiceCreation("creation task ended without a result".to_string())),
            },
            cause = &mut interrupt => {
                debug!("acquire interrupted: {}", cause);
                Err(Error::WriteInterrupted(cause))
            }
        }
    }

    pub(crate) fn release(&self, service: F::Service) {
        self.shared.release(service);
    }

    /// Availability of the underlying factory. Cache contents play no part.
    pub fn is_available(&self) -> bool {
        self.shared.factory.is_available()
    }

    /// Close the pool: drain and close every cached service, wait (up to
    /// `deadline`) for background closes, then close the factory.
    ///
    /// Services still checked out are closed when they are released.
    pub async fn close(&self, deadline: Instant) -> Result<()> {
        let drained = {
            let mut state = self.shared.state.lock();
            if !state.closed {
                info!("Closing caching pool ({} cached)", state.queue.len());
            }
            state.closed = true;
            state.reaper.disarm();
            state.queue.drain()
        };
        for service in drained {
            self.shared.dispose(service, Disposal::Drained);
        }

        if tokio::time::timeout_at(deadline, self.shared.disposals.settled())
            .await
            .is_err()
        {
            warn!(
                "{} service close(s) still running at pool close deadline",
                self.shared.disposals.in_flight()
            );
        }

        self.shared.factory.close(deadline).await
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Resolves once every background close started so far has finished
    pub async fn wait_for_closes(&self) {
        self.shared.disposals.settled().await
    }

    pub fn cached(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn stats(&self) -> PoolStats {
        let counters = &self.shared.counters;
        PoolStats {
            cached: self.cached(),
            created: counters.created.load(Ordering::Relaxed),
            reused: counters.reused.load(Ordering::Relaxed),
            expired: counters.expired.load(Ordering::Relaxed),
            unhealthy: counters.unhealthy.load(Ordering::Relaxed),
            over_capacity: counters.over_capacity.load(Ordering::Relaxed),
            after_close: counters.after_close.load(Ordering::Relaxed),
            drained: counters.drained.load(Ordering::Relaxed),
            orphaned: counters.orphaned.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn reaper_deadline(&self) -> Option<Instant> {
        self.shared.state.lock().reaper.armed_deadline()
    }

    #[cfg(test)]
    fn cached_deadlines(&self) -> Vec<Instant> {
        self.shared.state.lock().queue.deadlines().collect()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::pool::testing::FakeFactory;
    use crate::timer::MockTimer;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Step {
        Acquire,
        Release(usize),
        MarkUnhealthy(usize),
        Advance(u64),
        Close,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => Just(Step::Acquire),
            3 => any::<usize>().prop_map(Step::Release),
            1 => any::<usize>().prop_map(Step::MarkUnhealthy),
            3 => (0u64..4_000).prop_map(Step::Advance),
            1 => Just(Step::Close),
        ]
    }

    fn check_invariants(pool: &CachingPool<FakeFactory>, timer: &MockTimer, capacity: Option<usize>) {
        let deadlines = pool.cached_deadlines();
        if let Some(capacity) = capacity {
            assert!(pool.cached() <= capacity);
        }
        assert!(deadlines.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(pool.reaper_deadline(), deadlines.first().copied());
        assert_eq!(timer.pending(), usize::from(!deadlines.is_empty()));
        if let Some(head) = deadlines.first() {
            assert!(*head > timer.now());
        }
    }

    proptest! {
        #[test]
        fn test_invariants_hold_for_any_sequence(
            capacity in proptest::option::of(0usize..4),
            steps in proptest::collection::vec(step(), 1..60),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let factory = FakeFactory::new();
                let timer = MockTimer::new();
                let config = PoolConfig {
                    capacity,
                    ttl_ms: 5_000,
                    ..PoolConfig::default()
                };
                let pool = CachingPool::new(factory.clone(), Arc::new(timer.clone()), config).unwrap();
                let mut held = Vec::new();

                for step in steps {
                    match step {
                        Step::Acquire => match pool.acquire().await {
                            Ok(service) => held.push(service),
                            Err(e) => assert!(pool.is_closed() && matches!(e, Error::ServiceClosed)),
                        },
                        Step::Release(i) if !held.is_empty() => {
                            let index = i % held.len();
                            held.swap_remove(index).release();
                        }
                        Step::MarkUnhealthy(i) if !held.is_empty() => {
                            let index = i % held.len();
                            factory.probe(held[index].id).set_healthy(false);
                        }
                        Step::Advance(ms) => timer.advance(Duration::from_millis(ms)),
                        Step::Close => pool.close(timer.now()).await.unwrap(),
                        _ => {}
                    }
                    check_invariants(&pool, &timer, capacity);
                }

                drop(held);
                pool.close(timer.now() + Duration::from_secs(1)).await.unwrap();
                pool.wait_for_closes().await;
                // every service ever created ends up closed exactly once
                assert_eq!(factory.total_closes(), factory.created());
                assert!(factory.probes().iter().all(|probe| probe.closes() == 1));
            });
        }
    }
}
