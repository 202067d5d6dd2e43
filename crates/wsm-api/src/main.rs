mod auth;
mod config;
mod error;
mod rate_limit;
mod routes;

use std::sync::Arc;

use config::AppConfig;
use routes::{app_router, AppState};
use wsm_core::services::DatabaseService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wsm_api=info".parse()?)
                .add_directive("wsm_core=info".parse()?),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting wsm-api with config: {:?}", config);

    let db = DatabaseService::open_path(&config.database_path).await?;
    let state = AppState::new(config, db);
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("wsm-api listening on {}", bind_addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("wsm-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", error);
        std::future::pending::<()>().await;
    }
}
