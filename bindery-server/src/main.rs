mod config;
mod server;

use bindery_core::{
    CatalogEngine, FlavorSpec, FsStorage, LockBackend, MemoryLockBackend, RedisLockBackend,
};
use clap::{Parser, Subcommand};
use config::{Config, LockBackendKind};
use server::{ServerState, run_server};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "bindery")]
#[command(about = "Versioned, content-addressable bundle catalog")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bindery=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            tracing::info!("Starting Bindery server with config: {}", config);

            let cfg = match Config::from_file(&config) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to load config: {}", e);
                    std::process::exit(1);
                }
            };

            let state = match build_state(&cfg).await {
                Ok(state) => state,
                Err(e) => {
                    tracing::error!("Failed to initialize catalog: {}", e);
                    std::process::exit(1);
                }
            };

            tracing::info!(
                "Catalog: {}, Root: {:?}, Bind: {}",
                cfg.catalog,
                cfg.root,
                cfg.bind_addr
            );

            if let Err(e) = run_server(state, &cfg).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn build_state(config: &Config) -> bindery_core::Result<Arc<ServerState>> {
    let storage = Arc::new(FsStorage::new(config.root.clone())?);

    let lock_backend: Arc<dyn LockBackend> = match config.lock.backend {
        LockBackendKind::Memory => {
            tracing::warn!("Using in-process locking; do not run multiple servers");
            Arc::new(MemoryLockBackend::new())
        }
        LockBackendKind::Redis => {
            let redis = config.lock.redis.as_ref().ok_or_else(|| {
                bindery_core::CatalogError::Config(
                    "redis configuration is required for redis backend".to_string(),
                )
            })?;
            Arc::new(RedisLockBackend::new(&redis.url, config.lock.namespace_or_default()).await?)
        }
    };

    let flavors = FlavorSpec::from_rules(&config.flavors)?;
    let engine = CatalogEngine::new(
        config.catalog.clone(),
        storage,
        lock_backend,
        config.engine.clone(),
    );

    Ok(Arc::new(ServerState { engine, flavors }))
}
