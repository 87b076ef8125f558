//! Store Orchestrator
//!
//! [`Store`] owns the in-memory map and its [`TtlIndex`], validates every
//! input, and drives the [`PersistenceManager`]. It also owns the two timers
//! (debounced auto-save and the background expiry sweep) and the optional
//! shutdown hook.
//!
//! ## Design Decisions
//!
//! 1. **One lock**: map, TTL index and flags live behind a single `Mutex`.
//!    It is held only for short synchronous sections, never across an
//!    `.await`, and never while subscribers are being notified.
//! 2. **Lazy + active expiry**: reads check the TTL index and delete expired
//!    keys on the spot; iteration and the sweeper remove every expired key at
//!    once and publish a single `Expired` event.
//! 3. **Generation counter**: every mutation bumps it. A save clears the dirty
//!    flag only if nothing changed while it was writing.
//! 4. **Weak timer references**: timer tasks and the shutdown hook hold a
//!    `Weak` pointer, so they never keep a dropped store alive.
//!
//! ## Data Flow
//!
//! ```text
//!   set/delete/batch/clear ──► map + TtlIndex ──► dirty ──► auto-save timer
//!                                                              │
//!   get/has/keys ──► TtlIndex expiry check ──► lazy delete     ▼
//!                                                     PersistenceManager::save
//! ```

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::events::{Event, EventBus, SubscriptionId};
use crate::lifecycle::{HookId, Lifecycle};
use crate::persistence::{Document, PersistenceManager, SaveOutcome};
use crate::storage::batch::{self, BatchOperation, BatchResult};
use crate::storage::expiry::ExpirySweeper;
use crate::storage::ttl::{validate_ttl, TtlIndex};
use crate::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Rejects empty keys.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::Validation("key must be a non-empty string".into()));
    }
    Ok(())
}

/// Mutable state guarded by the store lock.
#[derive(Default)]
struct StoreState {
    data: BTreeMap<String, Value>,
    ttl: TtlIndex,
    dirty: bool,
    generation: u64,
    save_timer: Option<JoinHandle<()>>,
    sweeper: Option<ExpirySweeper>,
    lifecycle_hook: Option<HookId>,
    closed: bool,
}

impl StoreState {
    /// Replaces map and TTL index with a loaded document.
    fn replace(&mut self, document: Document) {
        self.ttl.load(document.ttl);
        self.data = document.data;
        self.dirty = false;
        self.generation += 1;
    }
}

struct StoreInner {
    state: Mutex<StoreState>,
    persistence: PersistenceManager,
    events: EventBus,
    auto_save: bool,
    auto_save_interval: Duration,
    lifecycle: Option<Arc<Lifecycle>>,
    runtime: Option<Handle>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let (Some(lifecycle), Some(id)) = (&self.lifecycle, state.lifecycle_hook.take()) {
            lifecycle.deregister(id);
        }
        if state.dirty && !state.closed {
            warn!(
                path = %self.persistence.file_path().display(),
                "Store dropped with unsaved changes"
            );
        }
    }
}

/// An embedded, file-backed key-value store.
///
/// `Store` is a cheap handle; clones share the same underlying store.
///
/// # Example
///
/// ```
/// use stashkv::{Store, StoreConfig};
/// use std::time::Duration;
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = Store::open(StoreConfig::new(dir.path().join("app.json"))).unwrap();
///
/// store.set("name", "Ariz", None).unwrap();
/// store.set("session", "abc123", Some(Duration::from_secs(60))).unwrap();
///
/// assert_eq!(store.get("name").unwrap(), Some("Ariz".into()));
/// assert!(store.get_ttl("session").unwrap().is_some());
///
/// store.close();
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

/// Non-owning handle used by timer tasks.
#[derive(Clone)]
pub(crate) struct WeakStore(Weak<StoreInner>);

impl WeakStore {
    pub(crate) fn upgrade(&self) -> Option<Store> {
        self.0.upgrade().map(|inner| Store { inner })
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Store")
            .field("path", &self.inner.persistence.file_path())
            .field("keys", &state.data.len())
            .field("ttl_records", &state.ttl.len())
            .field("dirty", &state.dirty)
            .field("closed", &state.closed)
            .finish()
    }
}

impl Store {
    /// Opens a store, loading whatever is already on disk.
    ///
    /// Timers need a Tokio runtime. When called outside one, auto-save and the
    /// background sweep are disabled and the store must be flushed with
    /// [`Store::save_sync`] or [`Store::close`].
    ///
    /// # Errors
    ///
    /// [`StoreError::Configuration`] for an invalid configuration, or any load
    /// error that the backup could not recover from.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let codec = config.codec()?;
        let events = EventBus::new();
        let persistence = PersistenceManager::new(&config.path, codec, config.pretty, events.clone())?;
        let document = persistence.load_sync()?;

        let runtime = Handle::try_current().ok();
        if runtime.is_none() && (config.auto_save || !config.ttl_cleanup_interval.is_zero()) {
            warn!(
                path = %config.path.display(),
                "No Tokio runtime; auto-save and background expiry are disabled"
            );
        }

        let mut state = StoreState::default();
        state.replace(document);

        let store = Store {
            inner: Arc::new(StoreInner {
                state: Mutex::new(state),
                persistence,
                events,
                auto_save: config.auto_save,
                auto_save_interval: config.auto_save_interval,
                lifecycle: config.lifecycle.clone(),
                runtime,
            }),
        };

        store.start_sweeper(config.ttl_cleanup_interval);
        store.register_shutdown_hook();
        store.purge_expired();

        let size = store.state().data.len();
        store.emit(Event::Load {
            file_path: config.path.clone(),
            size,
        });
        info!(
            path = %config.path.display(),
            keys = size,
            compression = config.compression,
            encryption = config.encryption,
            "Store opened"
        );

        Ok(store)
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn downgrade(&self) -> WeakStore {
        WeakStore(Arc::downgrade(&self.inner))
    }

    fn emit(&self, event: Event) {
        self.inner.events.emit(event);
    }

    fn start_sweeper(&self, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        if let Some(runtime) = &self.inner.runtime {
            let sweeper = ExpirySweeper::start(runtime, self.downgrade(), interval);
            self.state().sweeper = Some(sweeper);
        }
    }

    fn register_shutdown_hook(&self) {
        let Some(lifecycle) = &self.inner.lifecycle else {
            return;
        };
        let weak = self.downgrade();
        let id = lifecycle.register(move || {
            if let Some(store) = weak.upgrade() {
                store.flush_quietly();
            }
        });
        self.state().lifecycle_hook = Some(id);
    }

    // ========================================================================
    // DIRTY TRACKING AND AUTO-SAVE
    // ========================================================================

    fn mark_dirty(&self, state: &mut StoreState) {
        state.dirty = true;
        state.generation += 1;
        self.schedule_save(state);
    }

    /// Arms the auto-save timer unless one is already pending.
    fn schedule_save(&self, state: &mut StoreState) {
        if !self.inner.auto_save || state.closed || state.save_timer.is_some() {
            return;
        }
        let Some(runtime) = &self.inner.runtime else {
            return;
        };

        let weak = self.downgrade();
        let delay = self.inner.auto_save_interval;
        state.save_timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(store) = weak.upgrade() else {
                return;
            };
            store.state().save_timer = None;

            if store.is_dirty() {
                trace!("Auto-save timer fired");
                // failures are published as Event::Error by the persistence manager
                match store.save().await {
                    // a joined write may have carried an older snapshot
                    Ok(()) if store.is_dirty() => {
                        let mut state = store.state();
                        store.schedule_save(&mut state);
                    }
                    Ok(()) => {}
                    Err(err) => debug!(error = %err, "Auto-save failed"),
                }
            }
        }));
    }

    fn mark_clean(&self, generation: u64) {
        let mut state = self.state();
        if state.generation == generation {
            state.dirty = false;
        }
    }

    /// Returns true if there are changes not yet written to disk.
    pub fn is_dirty(&self) -> bool {
        self.state().dirty
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Path of the main store file.
    pub fn file_path(&self) -> &Path {
        self.inner.persistence.file_path()
    }

    // ========================================================================
    // KEY OPERATIONS
    // ========================================================================

    /// Removes `key` from map and TTL index. Returns the removed value.
    fn remove_locked(&self, state: &mut StoreState, key: &str) -> Option<Value> {
        let old = state.data.remove(key);
        let had_ttl = state.ttl.clear_ttl(key);
        if old.is_some() || had_ttl {
            self.mark_dirty(state);
        }
        old
    }

    /// Lazily deletes `key` if its TTL has passed. Returns the removed value.
    fn expire_locked(&self, state: &mut StoreState, key: &str) -> Option<Value> {
        if !state.ttl.is_expired(key) {
            return None;
        }
        self.remove_locked(state, key)
    }

    fn emit_lazy_delete(&self, key: &str, expired: Option<Value>) {
        if let Some(old_value) = expired {
            debug!(key, "Key expired on access");
            self.emit(Event::Delete {
                key: key.to_string(),
                old_value,
            });
        }
    }

    /// Sets a key, replacing any previous value.
    ///
    /// With `ttl` the key expires after that long; without it any previous
    /// expiry is removed.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>, ttl: Option<Duration>) -> Result<()> {
        let key = key.into();
        validate_key(&key)?;
        if let Some(ttl) = ttl {
            validate_ttl(ttl)?;
        }
        let value = value.into();

        let old_value = {
            let mut state = self.state();
            let old = state.data.insert(key.clone(), value.clone());
            match ttl {
                Some(ttl) => {
                    state.ttl.set_ttl(&key, ttl);
                }
                None => {
                    state.ttl.clear_ttl(&key);
                }
            }
            self.mark_dirty(&mut state);
            old
        };

        trace!(key = %key, ttl_ms = ttl.map(|t| t.as_millis() as u64), "Key set");
        self.emit(Event::Set {
            key,
            value,
            old_value,
            ttl,
        });
        Ok(())
    }

    /// Returns the value of `key`, or `None` if it is missing or expired.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        validate_key(key)?;

        let (value, expired) = {
            let mut state = self.state();
            let expired = self.expire_locked(&mut state, key);
            (state.data.get(key).cloned(), expired)
        };

        if expired.is_some() {
            self.emit_lazy_delete(key, expired);
            return Ok(None);
        }

        self.emit(Event::Get {
            key: key.to_string(),
            value: value.clone(),
        });
        Ok(value)
    }

    /// Returns true if `key` holds a live value.
    pub fn has(&self, key: &str) -> Result<bool> {
        validate_key(key)?;

        let (present, expired) = {
            let mut state = self.state();
            let expired = self.expire_locked(&mut state, key);
            (state.data.contains_key(key), expired)
        };

        self.emit_lazy_delete(key, expired);
        Ok(present)
    }

    /// Deletes `key`. Returns true if a live value was removed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        validate_key(key)?;

        let (removed, expired) = {
            let mut state = self.state();
            let expired = self.expire_locked(&mut state, key);
            (self.remove_locked(&mut state, key), expired)
        };

        self.emit_lazy_delete(key, expired);
        match removed {
            Some(old_value) => {
                self.emit(Event::Delete {
                    key: key.to_string(),
                    old_value,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes every key.
    pub fn clear(&self) {
        let size = {
            let mut state = self.state();
            let size = state.data.len();
            state.data.clear();
            state.ttl.clear();
            if size > 0 {
                self.mark_dirty(&mut state);
            }
            size
        };

        if size > 0 {
            debug!(size, "Store cleared");
            self.emit(Event::Clear { size });
        }
    }

    /// Applies `operations` in order.
    ///
    /// Every operation is validated before any of them runs; one malformed
    /// operation fails the whole batch with [`StoreError::Validation`] and
    /// leaves the store untouched.
    pub fn batch(&self, operations: Vec<BatchOperation>) -> Result<Vec<BatchResult>> {
        let ttls = batch::validate_all(&operations)?;

        let results: Vec<BatchResult> = operations
            .iter()
            .zip(ttls)
            .map(|(op, ttl)| {
                let success = match op {
                    BatchOperation::Set { key, value, .. } => {
                        self.set(key.clone(), value.clone(), ttl).is_ok()
                    }
                    BatchOperation::Delete { key } => self.delete(key).unwrap_or(false),
                };
                BatchResult {
                    kind: op.kind(),
                    key: op.key().to_string(),
                    success,
                }
            })
            .collect();

        debug!(operations = operations.len(), "Batch applied");
        self.emit(Event::Batch {
            operations,
            results: results.clone(),
        });
        Ok(results)
    }

    // ========================================================================
    // TTL OPERATIONS
    // ========================================================================

    /// Gives an existing key a new lifetime.
    ///
    /// Returns false, and changes nothing, if the key is missing or expired.
    pub fn set_ttl(&self, key: &str, ttl: Duration) -> Result<bool> {
        validate_key(key)?;
        validate_ttl(ttl)?;

        let (applied, expired) = {
            let mut state = self.state();
            let expired = self.expire_locked(&mut state, key);
            let applied = state.data.contains_key(key);
            if applied {
                state.ttl.set_ttl(key, ttl);
                self.mark_dirty(&mut state);
            }
            (applied, expired)
        };

        self.emit_lazy_delete(key, expired);
        if applied {
            self.emit(Event::TtlSet {
                key: key.to_string(),
                ttl,
            });
        }
        Ok(applied)
    }

    /// Returns the remaining lifetime of `key`.
    ///
    /// `None` if the key has no expiry, does not exist, or has expired.
    pub fn get_ttl(&self, key: &str) -> Result<Option<Duration>> {
        validate_key(key)?;
        Ok(self.state().ttl.get_ttl(key))
    }

    /// Makes `key` permanent. Returns true if an expiry was removed.
    pub fn clear_ttl(&self, key: &str) -> Result<bool> {
        validate_key(key)?;

        let (cleared, expired) = {
            let mut state = self.state();
            let expired = self.expire_locked(&mut state, key);
            let cleared = state.ttl.clear_ttl(key);
            if cleared {
                self.mark_dirty(&mut state);
            }
            (cleared, expired)
        };

        self.emit_lazy_delete(key, expired);
        if cleared {
            self.emit(Event::TtlCleared {
                key: key.to_string(),
            });
        }
        Ok(cleared)
    }

    /// Removes every expired key and returns their names.
    ///
    /// Publishes one [`Event::Expired`] listing all of them, if any.
    pub fn purge_expired(&self) -> Vec<String> {
        let expired = {
            let mut state = self.state();
            let mut keys = state.ttl.expired_keys();
            if keys.is_empty() {
                return keys;
            }
            keys.sort();
            for key in &keys {
                state.data.remove(key);
            }
            state.ttl.remove_expired_keys(&keys);
            self.mark_dirty(&mut state);
            keys
        };

        debug!(count = expired.len(), "Expired keys removed");
        self.emit(Event::Expired {
            keys: expired.clone(),
        });
        expired
    }

    // ========================================================================
    // ITERATION
    // ========================================================================

    /// Live keys, in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.purge_expired();
        self.state().data.keys().cloned().collect()
    }

    /// Live values, ordered by key.
    pub fn values(&self) -> Vec<Value> {
        self.purge_expired();
        self.state().data.values().cloned().collect()
    }

    /// Live key/value pairs, ordered by key.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.purge_expired();
        self.state()
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of live keys.
    pub fn size(&self) -> usize {
        self.purge_expired();
        self.state().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    fn snapshot(&self) -> (Document, u64) {
        let state = self.state();
        let document = Document::new(state.data.clone(), state.ttl.snapshot());
        (document, state.generation)
    }

    /// Writes the current state to disk.
    ///
    /// If a save is already running this call waits for it and shares its
    /// result instead of writing again.
    pub async fn save(&self) -> Result<()> {
        let (document, generation) = self.snapshot();
        if self.inner.persistence.save(&document).await? == SaveOutcome::Written {
            self.mark_clean(generation);
        }
        Ok(())
    }

    /// Writes the current state to disk on the calling thread.
    ///
    /// # Errors
    ///
    /// [`StoreError::Concurrency`] if an async save is in flight.
    pub fn save_sync(&self) -> Result<()> {
        let (document, generation) = self.snapshot();
        self.inner.persistence.save_sync(&document)?;
        self.mark_clean(generation);
        Ok(())
    }

    /// Replaces the in-memory state with what is on disk.
    ///
    /// Returns the number of live keys after loading.
    pub async fn load(&self) -> Result<usize> {
        let document = self.inner.persistence.load().await?;
        Ok(self.apply_loaded(document))
    }

    /// Synchronous variant of [`Store::load`].
    pub fn load_sync(&self) -> Result<usize> {
        let document = self.inner.persistence.load_sync()?;
        Ok(self.apply_loaded(document))
    }

    fn apply_loaded(&self, document: Document) -> usize {
        self.state().replace(document);
        self.purge_expired();

        let size = self.state().data.len();
        info!(path = %self.file_path().display(), keys = size, "Store loaded");
        self.emit(Event::Load {
            file_path: self.file_path().to_path_buf(),
            size,
        });
        size
    }

    /// Saves dirty state, logging instead of returning failures.
    fn flush_quietly(&self) {
        if !self.is_dirty() {
            return;
        }
        if let Err(err) = self.save_sync() {
            error!(path = %self.file_path().display(), error = %err, "Failed to flush store");
            // write failures were already published by the persistence manager
            if matches!(err, StoreError::Concurrency(_)) {
                self.emit(Event::Error { cause: err });
            }
        }
    }

    // ========================================================================
    // NOTIFICATIONS AND LIFECYCLE
    // ========================================================================

    /// Registers a handler for every event this store publishes.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// The store's event bus.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Flushes pending changes and shuts the store's background work down.
    ///
    /// Cancels the auto-save timer and the expiry sweeper, removes the
    /// shutdown hook and detaches every subscriber. A failed flush is logged
    /// and published, never returned. Calling `close` twice is a no-op.
    pub fn close(&self) {
        let (timer, sweeper, hook) = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                state.save_timer.take(),
                state.sweeper.take(),
                state.lifecycle_hook.take(),
            )
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        drop(sweeper);

        self.flush_quietly();

        if let (Some(lifecycle), Some(id)) = (&self.inner.lifecycle, hook) {
            lifecycle.deregister(id);
        }
        self.inner.events.clear();

        info!(path = %self.file_path().display(), "Store closed");
    }
}
