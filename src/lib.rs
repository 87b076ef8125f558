//! # StashKV - An Embedded, File-Backed Key-Value Store
//!
//! StashKV keeps a map of string keys to JSON values in memory and persists it
//! to a single file. Keys can expire, the file can be gzip-compressed and
//! AES-256-GCM encrypted, and every write is atomic with a backup copy of the
//! previous version kept alongside.
//!
//! ## Features
//!
//! - **TTL Support**: per-key lifetimes with lazy and active expiry
//! - **Durable Writes**: temp file, fsync, backup, rename
//! - **Crash Recovery**: a corrupt main file is restored from its backup
//! - **Compression and Encryption**: optional, applied in that order
//! - **Single-Flight Saves**: concurrent saves collapse into one write
//! - **Notifications**: subscribers see every mutation, save and error
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              StashKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌──────────────────────────────┐    ┌────────────┐  │
//! │  │ StoreConfig │───>│            Store             │───>│  EventBus  │  │
//! │  └─────────────┘    │  BTreeMap<String, Value>     │    │ (handlers) │  │
//! │                     │  TtlIndex                    │    └────────────┘  │
//! │                     └──────┬────────────────▲──────┘                    │
//! │                            │                │                           │
//! │                            ▼                │                           │
//! │  ┌──────────────────────────────┐   ┌───────┴───────────────────────┐   │
//! │  │      PersistenceManager      │   │        ExpirySweeper          │   │
//! │  │  Document ─► Codec ─► file   │   │   (Background Tokio Task)     │   │
//! │  │  (gzip, AES-256-GCM)         │   └───────────────────────────────┘   │
//! │  └──────────────────────────────┘                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use stashkv::{Store, StoreConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> stashkv::Result<()> {
//!     let store = Store::open(
//!         StoreConfig::new("data/app.json")
//!             .with_compression(true)
//!             .with_encryption_key("correct horse battery staple"),
//!     )?;
//!
//!     store.set("user:1", serde_json::json!({ "name": "Ariz" }), None)?;
//!     store.set("session", "abc123", Some(Duration::from_secs(3600)))?;
//!
//!     store.save().await?;
//!     store.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: the store, its TTL index, batches and the expiry sweeper
//! - [`persistence`]: document format and atomic file writes
//! - [`codec`]: gzip and AES-256-GCM transforms
//! - [`events`]: notifications published by the store
//! - [`lifecycle`]: process shutdown hooks
//! - [`config`]: store options
//!
//! ## Design Highlights
//!
//! ### Lazy + Active Expiry
//!
//! Keys with TTL are expired in two ways:
//! 1. **Lazy**: When a key is accessed, we check if it's expired
//! 2. **Active**: Iteration and a background task remove every expired key
//!
//! Either way the key is removed exactly once and the file never keeps it.
//!
//! ### Debounced Saves
//!
//! Mutations mark the store dirty and arm a single timer. A burst of writes
//! therefore costs one file write, and a save that is already running is
//! shared by everyone who asks for one in the meantime.

pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod persistence;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use events::{Event, EventBus, EventKind, SubscriptionId};
pub use lifecycle::Lifecycle;
pub use serde_json::Value;
pub use storage::{BatchOperation, BatchResult, Store};

/// The store file used when none is given
pub use config::DEFAULT_FILE;

/// Version of StashKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
