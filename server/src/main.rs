mod app;
mod config;
mod error;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use webshell_core::connection::JsonConnectionStore;
use webshell_core::transport::Ssh2Connector;

use crate::app::AppState;
use crate::config::ServerConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    eprintln!("Usage: webshell-server [--config <path>]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>  Read server settings from a JSON file");
    eprintln!("  --version        Print version and exit");
    eprintln!("  --help           Print this help message");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--version" => {
                println!("webshell-server {}", VERSION);
                return Ok(());
            }
            "--help" => {
                print_usage();
                return Ok(());
            }
            "--config" => {
                let Some(path) = args.get(i + 1) else {
                    eprintln!("--config requires a path");
                    print_usage();
                    std::process::exit(1);
                };
                config_path = Some(PathBuf::from(path));
                i += 1;
            }
            other => {
                eprintln!("Unknown option: {}", other);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match config_path {
        Some(path) => ServerConfig::load(&path)?,
        None => ServerConfig::default(),
    };
    info!("webshell-server {} starting", VERSION);

    let store = Arc::new(JsonConnectionStore::load(&config.connections_file));
    let connector = Arc::new(Ssh2Connector::new(config.pool.timeouts()));
    let state = Arc::new(AppState::new(&config, store, connector));

    let sweeper_cancel = CancellationToken::new();
    let sweeper = state.pool.spawn_sweeper(sweeper_cancel.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Listening on {}", config.bind);

    let router = app::router(Arc::clone(&state), &config);
    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
                return;
            }
            info!("Shutdown signal received");
            shutdown_state.monitor.shutdown().await;
            shutdown_state.terminals.close_all().await;
        })
        .await
        .context("Server error")?;

    sweeper_cancel.cancel();
    let _ = sweeper.await;
    state.shutdown().await;
    info!("webshell-server stopped");
    Ok(())
}
