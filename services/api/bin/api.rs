//! Main Entrypoint for the Call Bridge API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing shared services (realtime connector, tools, session registry).
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server, over TLS when configured, and handling graceful shutdown.

use anyhow::{Context, anyhow};
use axum_server::tls_rustls::RustlsConfig;
use callbridge_api::{config::Config, router::create_router, state::AppState};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // Outbound wss:// to the realtime service and the TLS listener both need it.
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // --- 3. Initialize Shared Services ---
    let bind_address = config.bind_address;
    let tls = config.tls.clone();
    info!(
        profile = ?config.profile,
        model = %config.realtime_model,
        %bind_address,
        tls = tls.is_some(),
        "Service configured. Starting server..."
    );
    let app_state = Arc::new(AppState::from_config(config)?);

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    match tls {
        Some(tls) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .with_context(|| {
                    format!(
                        "Failed to load TLS certificates from {} and {}",
                        tls.cert_path.display(),
                        tls.key_path.display()
                    )
                })?;

            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            });

            axum_server::bind_rustls(bind_address, rustls_config)
                .handle(handle)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .context("TLS server error")?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(bind_address).await?;
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        }
    }

    info!("Server has shut down.");
    Ok(())
}
