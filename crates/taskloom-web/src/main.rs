//! Taskloom web server - browsing context engine over HTTP/WebSocket.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use taskloom_core::config::EngineConfig;
use taskloom_engine::ContextEngine;
use tracing::info;

mod routes;
mod state;

pub use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "taskloom-web")]
#[command(about = "Taskloom - browsing context engine server")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "3400")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Optional TOML config file; missing fields use defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Snapshot file path (overrides the config file)
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Admit file:// URLs (rejected by default)
    #[arg(long)]
    allow_file_urls: bool,
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if let Some(snapshot) = &cli.snapshot {
        config.snapshot_path = snapshot.clone();
    }
    if cli.allow_file_urls {
        config.allow_file_urls = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let addr = format!("{}:{}", cli.host, cli.port);

    let engine = ContextEngine::bootstrap(config)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let app = routes::create_router(AppState::new(engine.clone()));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("taskloom listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("draining and snapshotting");
    engine
        .shutdown()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
