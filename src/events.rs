//! Typed Notifications
//!
//! Every observable change in a store is published as an [`Event`] on the
//! store's [`EventBus`]. Delivery is synchronous: `emit` calls each current
//! subscriber, in registration order, before returning.
//!
//! ```
//! use stashkv::events::{Event, EventBus, EventKind};
//! use std::sync::{Arc, Mutex};
//!
//! let bus = EventBus::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//!
//! let sink = Arc::clone(&seen);
//! let id = bus.subscribe(move |event| sink.lock().unwrap().push(event.kind()));
//!
//! bus.emit(Event::Clear { size: 3 });
//! assert!(bus.unsubscribe(id));
//! bus.emit(Event::Clear { size: 1 });
//!
//! assert_eq!(*seen.lock().unwrap(), vec![EventKind::Clear]);
//! ```

use crate::error::StoreError;
use crate::storage::batch::{BatchOperation, BatchResult};
use crate::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A notification published by a store.
#[derive(Debug, Clone)]
pub enum Event {
    Set {
        key: String,
        value: Value,
        old_value: Option<Value>,
        ttl: Option<Duration>,
    },
    Get {
        key: String,
        value: Option<Value>,
    },
    Delete {
        key: String,
        old_value: Value,
    },
    Expired {
        keys: Vec<String>,
    },
    Batch {
        operations: Vec<BatchOperation>,
        results: Vec<BatchResult>,
    },
    Clear {
        size: usize,
    },
    Save {
        file_path: PathBuf,
    },
    Load {
        file_path: PathBuf,
        size: usize,
    },
    TtlSet {
        key: String,
        ttl: Duration,
    },
    TtlCleared {
        key: String,
    },
    Error {
        cause: StoreError,
    },
}

/// The name of an [`Event`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Set,
    Get,
    Delete,
    Expired,
    Batch,
    Clear,
    Save,
    Load,
    TtlSet,
    TtlCleared,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Set => "set",
            EventKind::Get => "get",
            EventKind::Delete => "delete",
            EventKind::Expired => "expired",
            EventKind::Batch => "batch",
            EventKind::Clear => "clear",
            EventKind::Save => "save",
            EventKind::Load => "load",
            EventKind::TtlSet => "ttl-set",
            EventKind::TtlCleared => "ttl-cleared",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Set { .. } => EventKind::Set,
            Event::Get { .. } => EventKind::Get,
            Event::Delete { .. } => EventKind::Delete,
            Event::Expired { .. } => EventKind::Expired,
            Event::Batch { .. } => EventKind::Batch,
            Event::Clear { .. } => EventKind::Clear,
            Event::Save { .. } => EventKind::Save,
            Event::Load { .. } => EventKind::Load,
            Event::TtlSet { .. } => EventKind::TtlSet,
            Event::TtlCleared { .. } => EventKind::TtlCleared,
            Event::Error { .. } => EventKind::Error,
        }
    }
}

/// Identifies one subscription so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Synchronous publish/subscribe hub shared by a store and its persistence manager.
///
/// Cloning the bus yields another handle to the same subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, Handler)>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler that receives every event.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers().push((id, Arc::new(handler)));
        id
    }

    /// Registers a handler that only receives events of one kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if event.kind() == kind {
                handler(event);
            }
        })
    }

    /// Removes a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers();
        let before = handlers.len();
        handlers.retain(|(sub, _)| *sub != id);
        handlers.len() != before
    }

    /// Removes every subscription.
    pub fn clear(&self) {
        self.handlers().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers().len()
    }

    /// Delivers `event` to all current subscribers in registration order.
    ///
    /// The subscriber list is snapshotted first, so handlers may subscribe or
    /// unsubscribe without deadlocking.
    pub fn emit(&self, event: Event) {
        let handlers: Vec<Handler> = self.handlers().iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler(&event);
        }
    }

    fn handlers(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Handler)>> {
        self.inner.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
