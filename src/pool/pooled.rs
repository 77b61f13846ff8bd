//! Checked-out service handed to callers

use std::fmt;
use std::ops::Deref;

use super::caching_pool::CachingPool;
use crate::error::Result;
use crate::service::{Service, ServiceFactory};

type Request<F> = <<F as ServiceFactory>::Service as Service>::Request;
type Response<F> = <<F as ServiceFactory>::Service as Service>::Response;

/// A service on loan from a `CachingPool`.
///
/// Requests go straight to the underlying service. Giving it back, through
/// `release` or by dropping it, lets the pool decide whether to cache or
/// close it. The service cannot be returned twice because `release`
/// consumes the wrapper.
pub struct Pooled<F: ServiceFactory> {
    service: Option<F::Service>,
    pool: CachingPool<F>,
}

impl<F: ServiceFactory> Pooled<F> {
    pub(crate) fn new(service: F::Service, pool: CachingPool<F>) -> Self {
        Self {
            service: Some(service),
            pool,
        }
    }

    fn service(&self) -> &F::Service {
        self.service.as_ref().expect("pooled service already released")
    }

    pub async fn dispatch(&self, request: Request<F>) -> Result<Response<F>> {
        self.service().dispatch(request).await
    }

    pub fn is_healthy(&self) -> bool {
        self.service().is_healthy()
    }

    /// Hand the service back to the pool
    pub fn release(mut self) {
        if let Some(service) = self.service.take() {
            self.pool.release(service);
        }
    }
}

impl<F: ServiceFactory> Deref for Pooled<F> {
    type Target = F::Service;

    fn deref(&self) -> &Self::Target {
        self.service()
    }
}

impl<F: ServiceFactory> Drop for Pooled<F> {
    fn drop(&mut self) {
        if let Some(service) = self.service.take() {
            self.pool.release(service);
        }
    }
}

impl<F: ServiceFactory> fmt::Debug for Pooled<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("released", &self.service.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::PoolConfig;
    use crate::pool::testing::FakeFactory;
    use crate::pool::CachingPool;
    use crate::timer::MockTimer;

    #[tokio::test]
    async fn test_dispatch_forwards_to_service() {
        let factory = FakeFactory::new();
        let pool = CachingPool::new(factory.clone(), Arc::new(MockTimer::new()), PoolConfig::default())
            .unwrap();

        let service = pool.acquire().await.unwrap();
        let reply = service.dispatch("ping".to_string()).await.unwrap();
        assert_eq!(reply, format!("{}:ping", service.id));
        assert_eq!(factory.probe(service.id).dispatches(), 1);
    }

    #[tokio::test]
    async fn test_drop_returns_service_to_pool() {
        let factory = FakeFactory::new();
        let pool = CachingPool::new(factory.clone(), Arc::new(MockTimer::new()), PoolConfig::default())
            .unwrap();

        {
            let _service = pool.acquire().await.unwrap();
            assert_eq!(pool.cached(), 0);
        }
        assert_eq!(pool.cached(), 1);
    }

    #[tokio::test]
    async fn test_release_returns_exactly_once() {
        let factory = FakeFactory::new();
        let pool = CachingPool::new(factory.clone(), Arc::new(MockTimer::new()), PoolConfig::default())
            .unwrap();

        let service = pool.acquire().await.unwrap();
        assert!(format!("{:?}", service).contains("released: false"));
        service.release();
        assert_eq!(pool.cached(), 1);
        assert_eq!(factory.total_closes(), 0);
    }
}
