use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::sync::{CancelToken, Syncer};

/// How often the background tick runs.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(120);
/// How long an in-progress sync may run after shutdown is requested.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(90);

/// Periodic background sync. The engine's own single-flight guard keeps a
/// tick from overlapping a foreground `sync` command.
pub struct SyncScheduler {
    handle: Option<JoinHandle<()>>,
    shutdown: mpsc::Sender<()>,
    cancel: CancelToken,
}

impl SyncScheduler {
    pub fn start(syncer: Arc<Syncer>, cancel: CancelToken) -> Self {
        let (shutdown, ticks) = mpsc::channel();
        let tick_cancel = cancel.clone();

        let handle = thread::spawn(move || loop {
            match ticks.recv_timeout(SYNC_INTERVAL) {
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(e) = syncer.sync(&tick_cancel) {
                        tracing::warn!(error = %e, "Background sync failed");
                    }
                }
                // Shutdown requested, or the client dropped the handle.
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        tracing::info!(interval_secs = SYNC_INTERVAL.as_secs(), "Background sync started");

        Self {
            handle: Some(handle),
            shutdown,
            cancel,
        }
    }

    /// Stop the tick and wait for any in-progress pass. Past the grace
    /// deadline the process is force-exited with code 1.
    pub fn shutdown(mut self) {
        self.cancel.cancel();
        let _ = self.shutdown.send(());

        // Watchdog: if the join below hangs on a stuck pass, abandon ship.
        let done = Arc::new(AtomicBool::new(false));
        let watchdog_done = done.clone();
        thread::spawn(move || {
            thread::sleep(SHUTDOWN_GRACE);
            if !watchdog_done.load(Ordering::SeqCst) {
                eprintln!("Something goes wrong in exiting from app...forcing exit");
                std::process::exit(1);
            }
        });

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        done.store(true, Ordering::SeqCst);

        tracing::info!("Background sync stopped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────
