//! CallPulse server
//!
//! Loads the configuration, connects the history store, starts the engine and
//! serves the HTTP/WebSocket surface until ctrl-c.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use callpulse_engine::config::CallCenterConfig;
use callpulse_engine::engine::CallCenterEngine;
use callpulse_engine::logging;
use callpulse_engine::server::{self, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time call center state sync and routing server", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "CALLPULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the configuration)
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Log level (overrides the configuration; RUST_LOG still wins)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = CallCenterConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.logging.json |= args.json_logs;

    logging::init_logging(&config.logging).context("initializing logging")?;
    logging::log_welcome("callpulse", env!("CARGO_PKG_VERSION"));

    let bind_addr = config.server.bind_addr;
    let engine = Arc::new(
        CallCenterEngine::from_config(config)
            .await
            .context("starting call center engine")?,
    );
    engine.start();

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;

    let state = AppState::new(Arc::clone(&engine));
    let shutdown_engine = Arc::clone(&engine);
    let signal = async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(err) => error!(error = %err, "Failed to listen for ctrl-c; shutting down"),
        }
        // Closing the hubs ends every open socket so the server can drain
        shutdown_engine.shutdown().await;
    };

    server::serve(listener, state, signal).await.context("serving HTTP")?;
    info!("CallPulse stopped");
    Ok(())
}
