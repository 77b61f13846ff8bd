//! Echo server command, a local upstream to point `bench` at

use crate::tcp::run_echo_server;
use anyhow::{Context, Result};
use clap::Args;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:7070")]
    pub listen: SocketAddr,
}

impl ServeArgs {
    pub async fn execute(&self) -> Result<()> {
        let listener = TcpListener::bind(self.listen)
            .await
            .with_context(|| format!("Failed to bind {}", self.listen))?;
        info!("🚀 Echo upstream ready on {}", self.listen);
        run_echo_server(listener).await.context("Echo server stopped")
    }
}
