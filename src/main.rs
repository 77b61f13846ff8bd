//! CLI for the caching pool: an echo upstream and a pooled load generator

use caching_pool::{
    cli::{BenchArgs, ServeArgs},
    init_logger_with_config,
    log_error, log_info,
    AppConfig,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "caching-pool")]
#[command(about = "TTL-based connection caching in front of a service factory")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a local echo upstream
    #[command(name = "serve")]
    Serve(ServeArgs),

    /// Drive a caching pool against an upstream and report pool statistics
    #[command(name = "bench")]
    Bench(BenchArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_config(cli.config.as_deref())?;

    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        cli.log_level.clone().unwrap_or_else(|| config.log_level.clone())
    };
    init_logger_with_config(&log_level);

    match cli.command {
        Commands::Serve(args) => {
            if let Err(e) = args.execute().await {
                log_error!("Echo server error: {:#}", e);
                std::process::exit(1);
            }
        }
        Commands::Bench(args) => {
            log_info!("📋 Version: {}", env!("CARGO_PKG_VERSION"));
            match args.execute(config).await {
                Ok(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
                Err(e) => {
                    log_error!("Bench failed: {:#}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
