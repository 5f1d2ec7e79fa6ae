//! Harmony Proxy daemon - rewrites harmony reasoning markup into <think> tags

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use harmony_proxy::config::Config;
use harmony_proxy::error::Result;
use harmony_proxy::proxy::ProxyServer;

/// Harmony Proxy - OpenAI-compatible proxy that exposes harmony reasoning as <think> tags
#[derive(Parser)]
#[command(name = "harmony-proxy")]
#[command(about = "An OpenAI-compatible proxy that rewrites harmony reasoning into <think> tags")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Address to listen on, overriding config and environment
    #[arg(long, short = 'l', global = true)]
    pub listen: Option<String>,

    /// Upstream base URL, overriding config and environment
    #[arg(long, short = 'u', global = true)]
    pub upstream: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the proxy server (default command)
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config, cli.listen, cli.upstream).await,
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},harmony_proxy={level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(
    config_path: Option<PathBuf>,
    listen: Option<String>,
    upstream: Option<String>,
) -> Result<()> {
    // The log level comes from config, so read it before logging is up
    let config_file = Config::find_path(config_path.as_deref());
    let mut config = match Config::load(config_file.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            return Err(e);
        }
    };
    config.apply_env();
    init_logging(&config.proxy.log_level);

    match &config_file {
        Some(path) => tracing::info!("Loaded config from: {}", path.display()),
        None => tracing::info!("No config file found, using defaults"),
    }

    if let Some(listen) = listen {
        config.proxy.listen_addr = listen;
    }
    if let Some(upstream) = upstream {
        config.proxy.upstream_url = upstream;
    }
    tracing::debug!("Config loaded: {:?}", config);

    tracing::info!("Starting harmony-proxy");
    let proxy = ProxyServer::new(config.proxy);
    proxy.serve().await?;

    tracing::info!("harmony-proxy stopped");
    Ok(())
}
