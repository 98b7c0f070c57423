//! InvHub Server: inventory datastore backup administration.
//!
//! Main entry point that wires the backup engine, service, and API together
//! and starts the server.

use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

use invhub_backup::BackupManager;
use invhub_core::config::AppConfig;
use invhub_core::error::AppError;

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from file, environment overlay, and variables
fn load_configuration() -> Result<AppConfig, AppError> {
    let config_path =
        std::env::var("INVHUB_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
    let env = std::env::var("INVHUB_ENV").unwrap_or_else(|_| "development".to_string());

    AppConfig::load(&config_path, &env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting InvHub v{}", env!("CARGO_PKG_VERSION"));

    let manager = BackupManager::open(&config.backup).await?;
    let datastore_lock = manager.lock().clone();
    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = invhub_api::build_router(invhub_api::AppState::new(config, manager));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!("InvHub server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown...");
        })
        .await
        .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;

    // A restore must never be cut off mid-swap.
    if datastore_lock.is_locked() {
        tracing::warn!(
            grace_seconds = grace.as_secs(),
            "Waiting for datastore operation to finish"
        );
        match tokio::time::timeout(grace, datastore_lock.acquire("shutdown")).await {
            Ok(Ok(_guard)) => {}
            Ok(Err(e)) => tracing::error!("Cannot take datastore lock at shutdown: {}", e),
            Err(_) => tracing::error!("Datastore operation still running at shutdown"),
        }
    }

    tracing::info!("InvHub server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
}
