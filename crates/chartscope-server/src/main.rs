use std::path::PathBuf;

use anyhow::{Context, Result};
use chartscope_engine::{AnalysisMode, ClaudeConfig};
use clap::Parser;

mod config;
mod error;
mod routes;
mod state;
mod uploads;

use config::ServerConfig;
use state::AppState;

#[derive(Debug, Parser)]
#[command(name = "chartscope", version, about = "Trend chart analysis server")]
struct Cli {
    #[arg(long, env = "CHARTSCOPE_HOST", default_value = "0.0.0.0")]
    host: String,
    #[arg(long, env = "PORT", default_value_t = 5000)]
    port: u16,
    #[arg(long, env = "CHARTSCOPE_UPLOADS_DIR", default_value = "uploads")]
    uploads_dir: PathBuf,
    #[arg(long, env = "CHARTSCOPE_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,
    /// auto, live or demo
    #[arg(long, env = "CHARTSCOPE_MODE", default_value = "auto")]
    mode: AnalysisMode,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            uploads_dir: self.uploads_dir,
            data_dir: self.data_dir,
            mode: self.mode,
            claude: ClaudeConfig::from_env(),
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("chartscope error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .ok();

    let config = Cli::parse().into_config();
    let addr = config.bind_addr()?;
    let state = AppState::from_config(&config)?;
    tracing::info!(mode = config.mode.as_str(), %addr, "starting chartscope");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        routes::serve(listener, state, shutdown_signal()).await
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
