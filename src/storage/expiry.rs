//! Background Expiry Sweeper
//!
//! Periodically removes expired keys from a store. This is "active expiry",
//! as opposed to the "lazy expiry" that happens when a key is accessed.
//!
//! ## Why Do We Need This?
//!
//! Lazy expiry only runs when a key is touched. A key that expires and is
//! never read again would otherwise stay in memory, and in the saved file's
//! `data` section, forever. The sweeper bounds how long that can last.
//!
//! ## Design
//!
//! The sweeper runs as a Tokio task and:
//! 1. Sleeps for the configured interval
//! 2. Wakes up and calls [`Store::purge_expired`](crate::Store::purge_expired)
//! 3. Logs how many keys were removed
//!
//! It holds only a weak reference to the store, so it never keeps a dropped
//! store alive, and it stops when its handle is dropped.

use crate::storage::store::WeakStore;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the sweeper on `runtime`, sweeping `store` every `interval`.
    pub(crate) fn start(runtime: &Handle, store: WeakStore, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        runtime.spawn(sweeper_loop(store, interval, shutdown_rx));

        info!(interval_ms = interval.as_millis() as u64, "Background expiry sweeper started");

        Self { shutdown_tx }
    }

    /// Stops the expiry sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        debug!("Background expiry sweeper stopped");
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop(store: WeakStore, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        // Wait for the interval or shutdown signal
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let Some(store) = store.upgrade() else {
            trace!("Store dropped, expiry sweeper exiting");
            return;
        };

        let expired = store.purge_expired();

        if expired.is_empty() {
            trace!("Expiry sweep found nothing");
        } else {
            debug!(
                expired = expired.len(),
                keys_remaining = store.size(),
                "Expired keys cleaned up"
            );
        }
    }
}
