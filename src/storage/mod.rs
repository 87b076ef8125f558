//! Storage Module
//!
//! The in-memory side of StashKV: the [`Store`] orchestrator, its TTL index,
//! batch operations and the background expiry sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │  ┌──────────────────────┐   ┌──────────────────────┐        │
//! │  │ BTreeMap<key, Value> │   │ TtlIndex             │        │
//! │  │ (entries)            │   │ key -> epoch millis  │        │
//! │  └──────────────────────┘   └──────────────────────┘        │
//! │              one Mutex, never held across .await            │
//! └─────────────────────────────────────────────────────────────┘
//!          ▲                                 │
//!          │                                 ▼
//!  ┌───────┴──────────────┐      ┌──────────────────────────┐
//!  │   ExpirySweeper      │      │   PersistenceManager     │
//!  │ (Background Tokio    │      │ (atomic writes, backup,  │
//!  │  Task)               │      │  single-flight saves)    │
//!  └──────────────────────┘      └──────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **TTL Support**: keys can expire, with millisecond resolution
//! - **Lazy Expiry**: expired keys are deleted when accessed
//! - **Active Expiry**: iteration and the sweeper remove every expired key
//! - **Batches**: validated up front, applied in order
//! - **Debounced Auto-Save**: bursts of mutations produce one write

pub mod batch;
pub mod expiry;
pub mod store;
pub mod ttl;

// Re-export commonly used types
pub use batch::{BatchOpKind, BatchOperation, BatchResult};
pub use expiry::ExpirySweeper;
pub use store::Store;
pub use ttl::{epoch_millis, ttl_from_secs, validate_ttl, TtlIndex};
