//! Background sweeper that evicts expired blob records.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::store::BlobStore;

/// Handle to the background sweep task.
///
/// Dropping the handle does not stop the task; call [`Sweeper::stop`] during
/// teardown.
pub struct Sweeper {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl Sweeper {
    /// Start sweeping `store` every `interval`.
    pub fn start(store: Arc<BlobStore>, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a fresh store is
            // not swept at startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.sweep_expired().await {
                            Ok(removed) if removed > 0 => {
                                debug!(removed, "sweeper evicted expired blobs");
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "blob sweep failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("blob sweeper stopping");
                        break;
                    }
                }
            }
        });

        Self { handle, shutdown }
    }

    /// Stop the sweep task and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
#[path = "sweeper_tests.rs"]
mod tests;
