//! campaign-server binary entry point.
//!
//! Usage:
//! ```bash
//! campaign-server --config campaign-server.toml
//! campaign-server --port 51234 --gm-password dragon
//! campaign-server --help
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use sync_transfer::{AssetStore, FsAssetStore};
use tabletop_sync_server::{http, CampaignServer, CampaignStore, Config, ServerContext};
use tracing_subscriber::EnvFilter;

/// Default configuration file, read if present.
const DEFAULT_CONFIG: &str = "campaign-server.toml";

/// Authoritative campaign server.
#[derive(Parser, Debug)]
#[command(name = "campaign-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file (default: campaign-server.toml if it exists)
    #[arg(long)]
    config: Option<PathBuf>,

    /// TCP port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Password required to join as GM
    #[arg(long)]
    gm_password: Option<String>,

    /// Password required to join as a player
    #[arg(long)]
    player_password: Option<String>,

    /// Announce this server to the configured directory
    #[arg(long)]
    register: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if default.exists() {
                Config::from_file(&default)?
            } else {
                Config::default()
            }
        }
    };

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.gm_password.is_some() {
        config.server.gm_password = args.gm_password.clone();
    }
    if args.player_password.is_some() {
        config.server.player_password = args.player_password.clone();
    }
    if args.register {
        config.directory.register = true;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let store = FsAssetStore::open(&config.assets.root)
        .with_context(|| format!("opening asset store {}", config.assets.root.display()))?;
    tracing::info!("Asset store at {} ({} assets)", config.assets.root.display(), store.list().len());

    let http_config = config.http.clone();
    let ctx = Arc::new(ServerContext::new(
        config,
        Box::new(CampaignStore::default()),
        Arc::new(store) as Arc<dyn AssetStore>,
    ));

    let http_task = if http_config.enabled {
        let listener = tokio::net::TcpListener::bind(&http_config.bind_address)
            .await
            .with_context(|| format!("binding HTTP on {}", http_config.bind_address))?;
        tracing::info!("HTTP endpoints on {}", http_config.bind_address);
        let app = http::build_router(Arc::clone(&ctx));
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("HTTP server error: {}", e);
            }
        }))
    } else {
        None
    };

    let server = CampaignServer::bind(ctx).await?;
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C");
            shutdown.shutdown();
        }
    });

    server.run().await?;
    if let Some(task) = http_task {
        task.abort();
    }
    // Give sessions a moment to flush Bye.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    Ok(())
}
