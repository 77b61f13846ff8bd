//! Load generator that drives a caching pool over TCP

use crate::config::AppConfig;
use crate::pool::{CachingPool, PoolStats};
use crate::tcp::TcpServiceFactory;
use crate::timer::TokioTimer;
use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Args;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Args)]
pub struct BenchArgs {
    /// Upstream address (defaults to the configured upstream)
    #[arg(long)]
    pub addr: Option<SocketAddr>,

    /// Total number of requests to send
    #[arg(long, default_value = "1000")]
    pub requests: usize,

    /// Number of concurrent workers
    #[arg(long, default_value = "4")]
    pub concurrency: usize,

    /// Idle time-to-live for cached connections, in milliseconds
    #[arg(long)]
    pub ttl_ms: Option<u64>,

    /// Maximum cached idle connections
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Pause between requests of one worker, in milliseconds
    #[arg(long, default_value = "0")]
    pub think_ms: u64,

    /// Request payload
    #[arg(long, default_value = "ping")]
    pub payload: String,
}

impl BenchArgs {
    /// Merge CLI overrides into the loaded configuration
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(addr) = self.addr {
            config.upstream.addr = addr;
        }
        if let Some(ttl_ms) = self.ttl_ms {
            config.pool.ttl_ms = ttl_ms;
        }
        if self.capacity.is_some() {
            config.pool.capacity = self.capacity;
        }
    }

    pub async fn execute(&self, mut config: AppConfig) -> Result<PoolStats> {
        self.apply_to(&mut config);

        let factory = TcpServiceFactory::new(config.upstream.addr, config.upstream.connect_timeout());
        let timer = Arc::new(TokioTimer::current()?);
        let pool = CachingPool::new(factory, timer, config.pool.clone())
            .context("Failed to build caching pool")?;

        info!(
            "📊 Sending {} requests to {} with {} workers",
            self.requests, config.upstream.addr, self.concurrency
        );

        let started = Instant::now();
        let workers = self.concurrency.max(1);
        let payload = Bytes::from(self.payload.clone());
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let share = self.requests / workers + usize::from(worker < self.requests % workers);
            let pool = pool.clone();
            let payload = payload.clone();
            let think = Duration::from_millis(self.think_ms);
            handles.push(tokio::spawn(async move {
                let mut failures = 0usize;
                for _ in 0..share {
                    match pool.acquire().await {
                        Ok(conn) => {
                            if let Err(e) = conn.dispatch(payload.clone()).await {
                                debug!("worker {} dispatch failed: {}", worker, e);
                                failures += 1;
                            }
                            conn.release();
                        }
                        Err(e) => {
                            debug!("worker {} acquire failed: {}", worker, e);
                            failures += 1;
                        }
                    }
                    if !think.is_zero() {
                        tokio::time::sleep(think).await;
                    }
                }
                failures
            }));
        }

        let mut failures = 0;
        for handle in handles {
            failures += handle.await.context("Bench worker panicked")?;
        }
        let elapsed = started.elapsed();
        if failures > 0 {
            warn!("⚠️  {} of {} requests failed", failures, self.requests);
        }

        let stats = pool.stats();
        pool.close(Instant::now() + config.pool.close_timeout())
            .await
            .context("Failed to close caching pool")?;

        info!("✅ Completed {} requests in {:?}", self.requests, elapsed);
        Ok(stats)
    }
}
