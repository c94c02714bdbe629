use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use goph_keeper::api::{HttpServerApi, ServerApi, UserApi};
use goph_keeper::config::ClientConfig;
use goph_keeper::cryptor::Cryptor;
use goph_keeper::local_store::LocalStore;
use goph_keeper::scheduler::SyncScheduler;
use goph_keeper::session::ClientSession;
use goph_keeper::shell::{Shell, StdinResolver};
use goph_keeper::sync::{CancelToken, Syncer};

const LOG_RETENTION_DAYS: u64 = 7;

fn must<T, E: std::fmt::Display>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            eprintln!("{context}: {e}");
            std::process::exit(1);
        }
    }
}

/// Delete log files older than `LOG_RETENTION_DAYS`.
/// Runs once at startup; failures are logged but never block the app.
fn cleanup_old_logs(log_dir: &Path) {
    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    let cutoff = std::time::SystemTime::now()
        - Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60);

    for entry in entries.flatten() {
        let path = entry.path();

        // Only consider dated rollover files, never the active log.
        let name = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) if name.starts_with("goph-keeper.log.") => name.to_string(),
            _ => continue,
        };

        let modified = match entry.metadata().and_then(|meta| meta.modified()) {
            Ok(time) => time,
            Err(_) => continue,
        };

        if modified < cutoff {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(file = %name, error = %e, "Failed to remove old log file");
            } else {
                tracing::debug!(file = %name, "Removed old log file");
            }
        }
    }
}

fn main() {
    if dotenvy::from_filename(".env.client").is_err() {
        println!("No .env.client provided");
    }

    let config = must(ClientConfig::from_env(), "Bad configuration");
    must(
        fs::create_dir_all(&config.data_dir),
        "Failed to create data directory",
    );

    // Logs go to file only; stdout belongs to the prompt.
    let log_dir = config.data_dir.join("logs");
    let file_appender = tracing_appender::rolling::daily(&log_dir, "goph-keeper.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("goph_keeper=info"));
    let file_layer = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    tracing::info!(event = "client_started", "Goph Keeper client started");

    {
        let log_dir = log_dir.clone();
        std::thread::spawn(move || cleanup_old_logs(&log_dir));
    }

    let cryptor = Arc::new(must(
        Cryptor::new(&config.data_secret_key),
        "Failed to initialize encryption",
    ));
    let session = Arc::new(must(
        ClientSession::open(&config.data_dir.join("session.json")),
        "Failed to open session",
    ));
    let store = Arc::new(Mutex::new(must(
        LocalStore::open(&config.data_dir.join("user_stored_data.json")),
        "Failed to open storage",
    )));

    let http = must(
        reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build(),
        "Failed to build HTTP client",
    );
    let server_api: Arc<dyn ServerApi> = Arc::new(HttpServerApi::new(
        config.server_base_addr.clone(),
        http.clone(),
        session.clone(),
    ));
    let users = UserApi::new(config.server_base_addr.clone(), http);

    let syncer = Arc::new(Syncer::new(
        session.clone(),
        server_api,
        store.clone(),
        cryptor.clone(),
        Arc::new(StdinResolver),
    ));

    let cancel = CancelToken::new();
    let scheduler = SyncScheduler::start(syncer.clone(), cancel.clone());

    let mut shell = must(
        Shell::new(
            session,
            store,
            cryptor,
            users,
            syncer,
            cancel,
            config.data_dir.clone(),
        ),
        "Failed to start shell",
    );
    shell.run();

    tracing::info!(event = "client_exiting", "Goph Keeper client shutting down");
    scheduler.shutdown();
}
