//! Configuration loading

pub mod settings;

pub use settings::{AppConfig, PoolConfig, UpstreamConfig};
