use std::sync::Arc;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use goph_keeper::config::ServerConfig;
use goph_keeper::server_http::{router, AppState};
use goph_keeper::server_service::{RecordService, UserService};
use goph_keeper::server_store::{MemoryRecordRepository, MemoryUserRepository};
use goph_keeper::token::TokenManager;

fn must<T, E: std::fmt::Display>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            eprintln!("{context}: {e}");
            std::process::exit(1);
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    if dotenvy::from_filename(".env.server").is_err() {
        println!("No .env.server provided");
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("goph_keeper=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();

    let config = must(ServerConfig::from_env(), "Bad configuration");

    let tokens = TokenManager::new(&config.jwt_secret);
    let state = Arc::new(AppState {
        records: RecordService::new(Arc::new(MemoryRecordRepository::new())),
        users: UserService::new(Arc::new(MemoryUserRepository::new()), tokens.clone()),
        tokens,
    });

    let app = router(state);
    let listener = must(
        tokio::net::TcpListener::bind(&config.run_address).await,
        "Failed to bind",
    );

    tracing::info!(addr = %config.run_address, "Goph Keeper server listening");

    must(
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await,
        "Server error",
    );

    tracing::info!("Goph Keeper server stopped");
}
