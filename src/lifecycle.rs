//! Process Shutdown Hooks
//!
//! A [`Lifecycle`] is an explicit registry of callbacks to run when the
//! process is about to exit. Stores opened with a lifecycle register a flush
//! hook on construction and remove it again in [`Store::close`](crate::Store::close),
//! so nothing depends on global process state.
//!
//! The binary wires it to Ctrl-C:
//!
//! ```ignore
//! let lifecycle = Arc::new(Lifecycle::new());
//! let store = Store::open(StoreConfig::new("db.json").with_lifecycle(Arc::clone(&lifecycle)))?;
//! tokio::spawn(async move { lifecycle.shutdown_on_ctrl_c().await });
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Identifies one registered hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

type Hook = Arc<dyn Fn() + Send + Sync>;

/// Registry of shutdown callbacks.
#[derive(Default)]
pub struct Lifecycle {
    next_id: AtomicU64,
    hooks: Mutex<Vec<(HookId, Hook)>>,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("hooks", &self.hook_count())
            .finish()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hook to run at shutdown.
    pub fn register<F>(&self, hook: F) -> HookId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.hooks().push((id, Arc::new(hook)));
        debug!(hook = id.0, "Shutdown hook registered");
        id
    }

    /// Removes a hook. Returns false if it was not registered.
    pub fn deregister(&self, id: HookId) -> bool {
        let mut hooks = self.hooks();
        let before = hooks.len();
        hooks.retain(|(hook, _)| *hook != id);
        let removed = hooks.len() != before;
        if removed {
            debug!(hook = id.0, "Shutdown hook deregistered");
        }
        removed
    }

    pub fn hook_count(&self) -> usize {
        self.hooks().len()
    }

    /// Runs and removes every registered hook, in registration order.
    ///
    /// Returns the number of hooks that ran.
    pub fn shutdown(&self) -> usize {
        let hooks: Vec<(HookId, Hook)> = std::mem::take(&mut *self.hooks());
        let count = hooks.len();
        for (_, hook) in hooks {
            hook();
        }
        if count > 0 {
            info!(hooks = count, "Shutdown hooks completed");
        }
        count
    }

    /// Waits for Ctrl-C, then runs [`Lifecycle::shutdown`].
    pub async fn shutdown_on_ctrl_c(self: Arc<Self>) -> std::io::Result<usize> {
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received, flushing stores...");
        Ok(self.shutdown())
    }

    fn hooks(&self) -> std::sync::MutexGuard<'_, Vec<(HookId, Hook)>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
