//! Server binary: configuration, logging, and the accept loop.
//!
//! Exit codes: 0 on a clean ctrl-c stop, 1 on an uncaught runtime error,
//! 2 on invalid configuration.

use anyhow::Context;
use clap::Parser;
use common::Config;
use server::Server;
use std::{path::PathBuf, process::ExitCode, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "sawitdb-server", about = "Single-file relational database server")]
struct Args {
    /// JSON configuration file; CLI flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding the database files
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long)]
    log_level: Option<String>,

    /// Worker threads (default: CPU count)
    #[arg(long)]
    workers: Option<usize>,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => Config::default(),
    };

    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.log_level = log_level.clone();
    }
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }

    config.validate().map_err(anyhow::Error::from)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    fmt().with_env_filter(filter).init();

    let server = match Server::new(config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    let mut task = tokio::spawn(server.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            task.abort();
            ExitCode::SUCCESS
        }
        result = &mut task => {
            match result {
                Ok(Ok(())) => ExitCode::SUCCESS,
                Ok(Err(e)) => {
                    error!(error = %e, "server failed");
                    ExitCode::from(1)
                }
                Err(e) => {
                    error!(error = %e, "server task panicked");
                    ExitCode::from(1)
                }
            }
        }
    }
}
