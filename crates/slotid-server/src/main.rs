use anyhow::Context;
use clap::Parser;
use slotid::{Allocator, IdStore, LocalStore, RedisStore};
use slotid_server::server::config::{CliArgs, ServerConfig, StoreConfig};
use slotid_server::server::lifecycle::IdServer;
use slotid_server::server::telemetry::init_telemetry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

type DynStore = Box<dyn IdStore + Send>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let store = open_store(&config).await?;
    let allocator = Allocator::new(store, config.range).context("failed to build allocator")?;
    let server = Arc::new(IdServer::new(allocator, config.idle_timeout));

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen_addr))?;
    log_startup_info(&config);
    tracing::info!(
        range = %server.allocator().range(),
        "allocator ready"
    );

    tokio::spawn(shutdown_signal(Arc::clone(&server)));
    let result = server.run(listener).await;

    providers.shutdown();
    result.context("server failed")
}

async fn open_store(config: &ServerConfig) -> anyhow::Result<DynStore> {
    let size = config.range.size();
    let store: DynStore = match &config.store {
        StoreConfig::Local => Box::new(LocalStore::new(size)?),
        StoreConfig::Redis { host, key } => {
            let (host, key) = (host.clone(), key.clone());
            // Connecting is blocking I/O.
            let store = tokio::task::spawn_blocking(move || RedisStore::connect(&host, &key, size))
                .await?
                .context("failed to connect to redis")?;
            Box::new(store)
        }
    };
    Ok(store)
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting ID service on {} with full config: {:#?}",
            config.listen_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting ID service on {} with idle timeout {:?}",
            config.listen_addr,
            config.idle_timeout
        );
    }
}

async fn shutdown_signal(server: Arc<IdServer<DynStore>>) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // Keep allocations: a shared store outlives this process.
    server.shutdown().await;
}
