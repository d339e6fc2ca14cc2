//! Passkey Server - multi-tenant WebAuthn authentication
//!
//! Loads tenants from `TENANTS_FILE`, provisions their signing keys and serves
//! the ceremony endpoints under `/{tenant_id}`.

use std::net::SocketAddr;
use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use passkey_server::{
    create_router_with_config, storage, AppState, Config, RouterError, StorageError,
    TenantDirectory, TenantError,
};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("tenants: {0}")]
    Tenants(#[from] TenantError),

    #[error("router: {0}")]
    Router(#[from] RouterError),

    #[error("server: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "passkey_server=info,audit=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(Config::from_env()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), StartupError> {
    let store = storage::from_config(&config).await?;
    tracing::info!(backend = store.backend(), "Storage ready");

    let tenants = TenantDirectory::load(&config.tenants_file, store.clone()).await?;
    if tenants.is_empty() {
        tracing::warn!(file = %config.tenants_file.display(), "No tenants configured");
    } else {
        tracing::info!(count = tenants.len(), "Tenants loaded");
    }

    let app = create_router_with_config(AppState::new(tenants, store), &config)?;

    let addr = SocketAddr::from((config.host, config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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

    tracing::info!("Shutdown signal received");
}
