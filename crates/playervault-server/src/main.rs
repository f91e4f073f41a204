//! PlayerVault Server - HTTP image service gated by the player registry.
//!
//! This binary builds the registry from a game server directory (or another
//! authorization source) and serves per-player image storage over HTTP.

mod handlers;
mod maintenance;
mod server;

use anyhow::Result;
use clap::Parser;
use playervault_core::config::UrlConfig;
use playervault_core::{
    AuthBackend, AuthSettings, AuthSource, BlobStore, GatewayOptions, ImageGateway, ImageUrlScheme,
    LocalBlobStore, MemoryBlobStore, RegistryManager,
};
use server::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "playervault-server")]
#[command(about = "Per-player image storage for a game server")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "8000")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Game server directory containing the world folders
    #[arg(long)]
    world_root: Option<PathBuf>,

    /// Authorization source: registry, database or remote
    #[arg(long, default_value = "registry", value_parser = parse_backend)]
    auth: AuthBackend,

    /// SQLite users database (database auth)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Base URL of the user lookup service (remote auth)
    #[arg(long)]
    auth_url: Option<String>,

    /// Store images in this directory instead of in memory
    #[arg(long)]
    blob_dir: Option<PathBuf>,

    /// Bucket name used in image URLs
    #[arg(long, default_value = UrlConfig::DEFAULT_BUCKET)]
    bucket: String,

    /// Region used in image URLs
    #[arg(long, default_value = UrlConfig::DEFAULT_REGION)]
    region: String,

    /// Blob store call timeout in seconds
    #[arg(long, default_value = "15")]
    request_timeout: u64,

    /// Remote auth lookup timeout in seconds
    #[arg(long, default_value = "5")]
    auth_timeout: u64,

    /// Seconds between registry maintenance passes (0 disables)
    #[arg(long, default_value = "30")]
    maintenance_interval: u64,
}

fn parse_backend(s: &str) -> std::result::Result<AuthBackend, String> {
    AuthBackend::from_str(s).ok_or_else(|| format!("unknown auth backend: {}", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug {
        "playervault_core=debug,playervault_server=debug,tower_http=debug"
    } else {
        "info"
    };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting PlayerVault server");

    let registry = match &args.world_root {
        Some(root) => {
            info!("World root: {}", root.display());
            Some(RegistryManager::initialize(root).await?)
        }
        None => None,
    };

    let auth = AuthSettings {
        backend: args.auth,
        database_path: args.database.clone(),
        remote_url: args.auth_url.clone(),
        remote_timeout: Duration::from_secs(args.auth_timeout),
    }
    .build(registry.as_ref().map(RegistryManager::store))?;
    info!("Authorization source: {}", auth.name());

    let blobs: Arc<dyn BlobStore> = match &args.blob_dir {
        Some(dir) => {
            info!("Blob directory: {}", dir.display());
            Arc::new(LocalBlobStore::new(dir)?)
        }
        None => {
            warn!("No --blob-dir given, images are kept in memory only");
            Arc::new(MemoryBlobStore::new())
        }
    };

    let gateway = ImageGateway::with_options(
        auth,
        blobs,
        GatewayOptions {
            request_timeout: Duration::from_secs(args.request_timeout),
            url_scheme: ImageUrlScheme::new(args.bucket.clone(), args.region.clone()),
        },
    );

    let registry = registry.map(|r| Arc::new(Mutex::new(r)));
    let state = Arc::new(AppState {
        gateway,
        registry: registry.clone(),
    });

    let addr = server::start_server(state, &args.host, args.port).await?;

    let maintenance = match &registry {
        Some(registry) if args.maintenance_interval > 0 => {
            Some(maintenance::RegistryMaintenance::spawn(
                Arc::clone(registry),
                Duration::from_secs(args.maintenance_interval),
            ))
        }
        _ => None,
    };

    // Scripts and tests read the bound port from this line
    println!("PORT={}", addr.port());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    if let Some(maintenance) = maintenance {
        maintenance.stop().await;
    }
    if let Some(registry) = registry {
        registry.lock().await.shutdown().await;
    }

    Ok(())
}
