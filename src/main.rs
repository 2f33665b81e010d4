mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use calver_core::CalverConfig;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "calver-server", version, about = "Collaborative events with full version history")]
struct Args {
    /// Config file to use instead of ~/.config/calver/config.toml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configured one
    #[arg(long)]
    bind: Option<String>,
}

fn init_tracing(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    if let Err(e) = fmt().with_env_filter(filter).try_init() {
        warn!(error = %e, "tracing init failed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CalverConfig::load_from(path)?,
        None => CalverConfig::load()?,
    };
    init_tracing(&config.log_filter);

    let state = AppState::from_config(&config)?;
    tokio::spawn(state.service.invalidator().run());

    let app = routes::app(state);

    let bind = args.bind.unwrap_or_else(|| config.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address '{bind}'"))?;
    info!(%addr, store = ?config.store, "calver-server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
