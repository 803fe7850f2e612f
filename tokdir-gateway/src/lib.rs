mod conf;
mod error;
mod handler;
mod metrics;

use std::sync::Arc;

pub use conf::Config;
pub use error::GatewayError;
pub use handler::{HandlerSettings, build_router};
use tokdir_directory::{DirectoryConfig, TokenDirectory};
use tokdir_docstore::MemoryDocumentStore;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

pub fn setup_tracing(json_format: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);
    let fmt_layer = if json_format {
        fmt_layer.json().boxed()
    } else {
        fmt_layer.boxed()
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

pub async fn start_server(
    config: Config,
    directory_config: DirectoryConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    setup_tracing(config.json_logs())?;

    let store_config = config.store_config();
    store_config.validate()?;
    directory_config.check_store_limits(&store_config)?;
    let store = Arc::new(MemoryDocumentStore::new(store_config));
    let directory = Arc::new(TokenDirectory::new(store, directory_config)?);
    info!(
        shard_capacity = directory.config().shard_capacity,
        max_shard_bytes = directory.config().max_shard_bytes(),
        collection = %directory.config().shard_collection,
        "token directory ready"
    );

    let router = build_router(
        directory,
        HandlerSettings {
            default_scan_batch: config.default_scan_batch,
        },
    )
    .layer(axum::extract::DefaultBodyLimit::max(config.max_payload_bytes));
    let listener =
        TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    info!("start server on port {:?}", config.http_port);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
