use server_grpc::{FILE_DESCRIPTOR_SET, ThumbnailServer, ThumbnailServiceServer};
use shared::config::{Config, Mode};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::lookup_host;
use tonic::transport::Server;
use tonic_reflection::server::Builder as ReflectionBuilder;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use youthumb::sweeper::spawn_sweeper;
use youthumb::{FrameEncoder, HttpOrigin, Resolver, Retriever};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env before the subscriber so it can set RUST_LOG.
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match dotenv {
        Ok(path) => info!("Loaded environment variables from {}", path.display()),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = Config::from_env()?;
    info!(
        mode = ?config.mode,
        backend = config.cache_backend.as_str(),
        "starting youthumb gRPC server"
    );

    let store = storage_engine::open_store(config.cache_backend, &config.cache_path)?;
    let origin = Arc::new(HttpOrigin::from_config(&config)?);
    let retriever = Arc::new(Retriever::new(store.clone(), origin));
    let encoder = FrameEncoder::new(config.max_chunk_bytes)?;
    let server = ThumbnailServer::new(Resolver::default(), retriever, encoder);

    let sweeper = config
        .sweep_interval
        .map(|interval| spawn_sweeper(store.clone(), interval));

    let address = resolve_listen_addr(&config).await?;

    let reflection_service = match config.mode {
        Mode::Development => Some(
            ReflectionBuilder::configure()
                .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
                .build_v1()?,
        ),
        Mode::Production => None,
    };

    let grpc_server = Server::builder()
        .add_service(ThumbnailServiceServer::new(server))
        .add_optional_service(reflection_service)
        .serve_with_shutdown(address, shutdown_signal());

    info!("Server Listening on: grpc://{}", address);

    if let Err(e) = grpc_server.await {
        error!("server error: {}", e);
    }

    if let Some(handle) = sweeper {
        handle.abort();
    }
    info!("server stopped");
    Ok(())
}

async fn resolve_listen_addr(config: &Config) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let listen = config.listen_addr();
    lookup_host(&listen)
        .await?
        .next()
        .ok_or_else(|| format!("{listen} did not resolve to any address").into())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }

    info!("Shutting down gracefully...");
}
