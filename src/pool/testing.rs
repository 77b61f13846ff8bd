//! In-memory service factory used by the pool tests

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::service::{Service, ServiceFactory};

/// Observes one fake service from the outside
pub struct Probe {
    pub id: u64,
    healthy: AtomicBool,
    panic_on_health: AtomicBool,
    closes: AtomicUsize,
    dispatches: AtomicUsize,
}

impl Probe {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn dispatches(&self) -> usize {
        self.dispatches.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn panic_on_health_check(&self) {
        self.panic_on_health.store(true, Ordering::SeqCst);
    }
}

pub struct FakeService {
    pub id: u64,
    probe: Arc<Probe>,
}

#[async_trait]
impl Service for FakeService {
    type Request = String;
    type Response = String;

    async fn dispatch(&self, request: String) -> Result<String> {
        self.probe.dispatches.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}:{}", self.id, request))
    }

    fn is_healthy(&self) -> bool {
        if self.probe.panic_on_health.load(Ordering::SeqCst) {
            panic!("health check blew up");
        }
        self.probe.healthy.load(Ordering::SeqCst)
    }

    async fn close(&self, _deadline: Instant) -> Result<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FactoryInner {
    next_id: AtomicU64,
    create_calls: AtomicUsize,
    created: AtomicUsize,
    factory_closes: AtomicUsize,
    unavailable: AtomicBool,
    fail_next: Mutex<Option<String>>,
    probes: Mutex<Vec<Arc<Probe>>>,
    gate: Option<Arc<Semaphore>>,
}

#[derive(Clone)]
pub struct FakeFactory {
    inner: Arc<FactoryInner>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FactoryInner::default()),
        }
    }

    /// Every `create` waits for a permit from `open_gate`
    pub fn gated() -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                gate: Some(Arc::new(Semaphore::new(0))),
                ..FactoryInner::default()
            }),
        }
    }

    pub fn open_gate(&self, creations: usize) {
        if let Some(gate) = &self.inner.gate {
            gate.add_permits(creations);
        }
    }

    pub fn fail_next_create(&self, message: &str) {
        *self.inner.fail_next.lock() = Some(message.to_string());
    }

    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.inner.create_calls.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    pub fn factory_closes(&self) -> usize {
        self.inner.factory_closes.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> Vec<Arc<Probe>> {
        self.inner.probes.lock().clone()
    }

    pub fn probe(&self, id: u64) -> Arc<Probe> {
        self.probes()
            .into_iter()
            .find(|probe| probe.id == id)
            .expect("no service with that id")
    }

    pub fn total_closes(&self) -> usize {
        self.probes().iter().map(|probe| probe.closes()).sum()
    }
}

#[async_trait]
impl ServiceFactory for FakeFactory {
    type Service = FakeService;

    async fn create(&self) -> Result<FakeService> {
        self.inner.create_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.inner.fail_next.lock().take();
        if let Some(message) = failure {
            return Err(Error::ServiceCreation(message));
        }
        if let Some(gate) = &self.inner.gate {
            gate.acquire()
                .await
                .map_err(|e| Error::ServiceCreation(e.to_string()))?
                .forget();
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let probe = Arc::new(Probe {
            id,
            healthy: AtomicBool::new(true),
            panic_on_health: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
            dispatches: AtomicUsize::new(0),
        });
        self.inner.probes.lock().push(probe.clone());
        self.inner.created.fetch_add(1, Ordering::SeqCst);
        Ok(FakeService { id, probe })
    }

    async fn close(&self, _deadline: Instant) -> Result<()> {
        self.inner.factory_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_available(&self) -> bool {
        !self.inner.unavailable.load(Ordering::SeqCst)
    }
}

/// Yield until `condition` holds, failing the test after a few seconds
pub async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition never became true");
}
