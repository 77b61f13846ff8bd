//! TCP connections as pooled services
//!
//! Each `TcpConnection` is one socket to the upstream. A dispatch writes the
//! request bytes and reads a single chunk back, which suits request/response
//! protocols such as the bundled echo server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::service::{Service, ServiceFactory};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// One TCP connection to the upstream
pub struct TcpConnection {
    id: u64,
    local_addr: SocketAddr,
    stream: Mutex<TcpStream>,
    broken: AtomicBool,
}

impl TcpConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn exchange(&self, request: &[u8]) -> Result<Bytes> {
        let mut stream = self.stream.lock().await;
        stream.write_all(request).await?;

        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let read = stream.read_buf(&mut buf).await?;
        if read == 0 {
            return Err(Error::ConnectionClosed);
        }
        Ok(buf.freeze())
    }
}

#[async_trait]
impl Service for TcpConnection {
    type Request = Bytes;
    type Response = Bytes;

    async fn dispatch(&self, request: Bytes) -> Result<Bytes> {
        if self.broken.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        let result = self.exchange(&request).await;
        if let Err(e) = &result {
            debug!("connection {} broken: {}", self.id, e);
            self.broken.store(true, Ordering::Release);
        }
        result
    }

    fn is_healthy(&self) -> bool {
        !self.broken.load(Ordering::Acquire)
    }

    async fn close(&self, deadline: Instant) -> Result<()> {
        self.broken.store(true, Ordering::Release);
        let mut stream = self.stream.lock().await;
        tokio::time::timeout_at(deadline, stream.shutdown()).await??;
        debug!("connection {} closed", self.id);
        Ok(())
    }
}

/// Opens TCP connections to a fixed upstream address
pub struct TcpServiceFactory {
    addr: SocketAddr,
    connect_timeout: Duration,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl TcpServiceFactory {
    pub fn new(addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl ServiceFactory for TcpServiceFactory {
    type Service = TcpConnection;

    async fn create(&self) -> Result<TcpConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ServiceClosed);
        }
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.addr))
            .await?
            .map_err(|e| Error::ServiceCreation(format!("connect to {} failed: {}", self.addr, e)))?;
        stream.set_nodelay(true)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let local_addr = stream.local_addr()?;
        debug!("connection {} established {} -> {}", id, local_addr, self.addr);
        Ok(TcpConnection {
            id,
            local_addr,
            stream: Mutex::new(stream),
            broken: AtomicBool::new(false),
        })
    }

    async fn close(&self, _deadline: Instant) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("TCP factory for {} closed", self.addr);
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

/// Echo every byte received back to the sender, one task per connection
pub async fn run_echo_server(listener: TcpListener) -> Result<()> {
    info!("Echo server listening on {}", listener.local_addr()?);
    loop {
        let (mut socket, peer) = listener.accept().await?;
        debug!("accepted connection from {}", peer);
        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = socket.write_all(&buf[..n]).await {
                            warn!("echo write to {} failed: {}", peer, e);
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("echo read from {} failed: {}", peer, e);
                        break;
                    }
                }
            }
            debug!("connection from {} finished", peer);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::CachingPool;
    use crate::timer::TokioTimer;
    use std::sync::Arc;

    async fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run_echo_server(listener));
        addr
    }

    fn pool_for(addr: SocketAddr, ttl_ms: u64) -> CachingPool<TcpServiceFactory> {
        let factory = TcpServiceFactory::new(addr, Duration::from_secs(5));
        let config = PoolConfig {
            ttl_ms,
            ..PoolConfig::default()
        };
        CachingPool::new(factory, Arc::new(TokioTimer::current().unwrap()), config).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_round_trip_reuses_connection() {
        let addr = echo_server().await;
        let pool = pool_for(addr, 60_000);

        let conn = pool.acquire().await.unwrap();
        let reply = conn.dispatch(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(&reply[..], b"ping");
        let local = conn.local_addr();
        conn.release();

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.local_addr(), local);
        assert_eq!(pool.stats().created, 1);
        assert_eq!(pool.stats().reused, 1);
    }

    #[tokio::test]
    async fn test_idle_connection_reaped_after_ttl() {
        let addr = echo_server().await;
        let pool = pool_for(addr, 50);

        pool.acquire().await.unwrap().release();
        assert_eq!(pool.cached(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        pool.wait_for_closes().await;
        assert_eq!(pool.cached(), 0);
        assert_eq!(pool.stats().expired, 1);

        pool.acquire().await.unwrap();
        assert_eq!(pool.stats().created, 2);
    }

    #[tokio::test]
    async fn test_broken_connection_not_cached() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // accept and immediately hang up
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let pool = pool_for(addr, 60_000);
        let conn = pool.acquire().await.unwrap();
        assert!(conn.dispatch(Bytes::from_static(b"hello")).await.is_err());
        assert!(!conn.is_healthy());
        conn.release();

        assert_eq!(pool.cached(), 0);
        assert_eq!(pool.stats().unhealthy, 1);
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces_creation_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let pool = pool_for(addr, 1_000);
        assert!(matches!(pool.acquire().await, Err(Error::ServiceCreation(_))));
    }

    #[tokio::test]
    async fn test_pool_close_closes_factory() {
        let addr = echo_server().await;
        let pool = pool_for(addr, 60_000);
        pool.acquire().await.unwrap().release();

        pool.close(Instant::now() + Duration::from_secs(1)).await.unwrap();
        assert!(!pool.is_available());
        assert_eq!(pool.stats().drained, 1);
    }
}
