//! Caching Pool - TTL-based connection caching for service factories
//!
//! This library keeps recently released, still-healthy service handles (for
//! example RPC connections) around for a bounded time so they can be reused
//! instead of re-established, and reaps idle ones with a single lazily armed
//! timer.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod service;
pub mod tcp;
pub mod timer;

// Re-export commonly used items
pub use config::{AppConfig, PoolConfig, UpstreamConfig};
pub use error::{Error, Result};
pub use logging::init_logger_with_config;
pub use pool::{CachingPool, PoolStats, Pooled};
pub use service::{Service, ServiceFactory};
pub use timer::{MockTimer, Timer, TimerTask, TokioTimer};
