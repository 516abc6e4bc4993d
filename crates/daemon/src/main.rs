//! ShopGuard Daemon
//!
//! Supervises storefront test workers and serves their live progress.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod parser;
mod registry;
mod report;
mod server;
mod supervisor;

use config::DaemonConfig;
use server::AppState;
use supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "shopguardd")]
#[command(about = "ShopGuard daemon - storefront regression test supervisor")]
#[command(version)]
struct Cli {
    /// Configuration file path (default ~/.shopguard/config.toml)
    #[arg(short, long, env = "SHOPGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Data directory (catalog, reports)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Worker executable
    #[arg(short, long)]
    worker: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("ShopGuard daemon v{}", shopguard_common::VERSION);

    let config_path = cli
        .config
        .unwrap_or_else(shopguard_common::default_config_path);
    let mut config = DaemonConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if !config_path.exists() {
        config.save(&config_path)?;
        info!("Wrote default configuration to {}", config_path.display());
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(worker) = cli.worker {
        config.worker.program = worker;
    }
    config.validate()?;

    tokio::fs::create_dir_all(config.reports_dir()).await?;
    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen))?;

    info!("Catalog: {}", config.catalog_path().display());
    info!("Worker: {}", config.worker.program);

    let supervisor = Supervisor::new(config);

    let sweeper = supervisor.clone();
    let sweeper_handle = tokio::spawn(async move { sweeper.run_sweeper().await });

    let server_handle = tokio::spawn(server::serve(
        addr,
        AppState {
            supervisor: supervisor.clone(),
        },
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Err(e)) => error!("HTTP server error: {}", e),
                Err(e) => error!("HTTP server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
        result = sweeper_handle => {
            if let Err(e) = result {
                error!("Sweeper error: {}", e);
            }
        }
    }

    supervisor.shutdown().await;
    info!("Daemon shutdown complete");
    Ok(())
}
