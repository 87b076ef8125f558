//! Persistence Module
//!
//! Turns store snapshots into files and back.
//!
//! ```text
//!   Document ──► JSON ──► gzip? ──► AES-256-GCM? ──► store.json.tmp
//!                                                        │ fsync
//!                             store.json ──copy──► store.json.backup
//!                                                        │
//!                              store.json.tmp ──rename──► store.json
//! ```
//!
//! Loading runs the pipeline in reverse. If the main file cannot be read or
//! decoded, the backup is copied over it and loading is retried once.

pub mod document;
pub mod manager;

pub use document::{Document, FORMAT_VERSION};
pub use manager::{PersistenceManager, SaveOutcome, StorePaths, BACKUP_SUFFIX, TEMP_SUFFIX};
