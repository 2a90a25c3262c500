//! Analysis server: one `AnalysisSession` per TCP connection.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use rom_tracker::config::Config;
use rom_tracker::server;

#[derive(Parser, Debug)]
#[command(version = env!("GIT_VERSION"), about = "Pose analysis server")]
struct Cli {
    /// Config file (TOML). Defaults are used if it cannot be read.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Overrides server.listen_addr
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(&cli.config);
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    config.validate().context("invalid configuration")?;

    tracing::info!("Analysis Server ({})", env!("GIT_VERSION"));
    tracing::info!("Filter: {:?}", config.filter);

    let bind_addr: std::net::SocketAddr = config
        .server
        .listen_addr
        .parse()
        .context("invalid listen_addr")?;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Listening on {}", bind_addr);

    let config = Arc::new(config);
    loop {
        let (socket, addr) = listener.accept().await?;
        socket.set_nodelay(true)?;
        tracing::info!("Client connected: {}", addr);

        let config = Arc::clone(&config);
        tokio::spawn(async move {
            match server::handle_client(socket, &config).await {
                Ok(()) => tracing::info!("Client disconnected: {}", addr),
                Err(e) => tracing::warn!("Client {} error: {:#}", addr, e),
            }
        });
    }
}
