//! Collaborator abstractions the caching pool is built on
//!
//! A `ServiceFactory` produces stateful `Service` handles (for example one
//! TCP connection each). The pool only ever talks to these traits, so any
//! transport can be cached by implementing them.

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::Result;

/// A live, reusable service handle such as a network connection
#[async_trait]
pub trait Service: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    /// Send one request over this handle
    async fn dispatch(&self, request: Self::Request) -> Result<Self::Response>;

    /// Cheap, synchronous health check. Must not block.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Tear the handle down. Idempotent and best-effort; `deadline` bounds
    /// how long a graceful shutdown may take.
    async fn close(&self, deadline: Instant) -> Result<()>;
}

/// Produces new service handles on demand
#[async_trait]
pub trait ServiceFactory: Send + Sync + 'static {
    type Service: Service;

    /// Establish a new handle
    async fn create(&self) -> Result<Self::Service>;

    /// Close the factory itself. Idempotent and best-effort.
    async fn close(&self, deadline: Instant) -> Result<()>;

    /// Whether the factory is currently able to produce handles
    fn is_available(&self) -> bool {
        true
    }
}
