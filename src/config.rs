//! Store Configuration
//!
//! [`StoreConfig`] collects every option a store is opened with. It follows a
//! plain-struct-plus-`Default` shape with `with_*` builder helpers:
//!
//! ```
//! use stashkv::StoreConfig;
//! use std::time::Duration;
//!
//! let config = StoreConfig::new("data/app.json")
//!     .with_compression(true)
//!     .with_encryption_key("correct horse battery staple")
//!     .with_auto_save_interval(Duration::from_millis(250));
//!
//! assert!(config.validate().is_ok());
//! ```

use crate::codec::{Cipher, Codec};
use crate::error::{Result, StoreError};
use crate::lifecycle::Lifecycle;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default file name used when no path is given.
pub const DEFAULT_FILE: &str = "stashkv.json";

/// Configuration for a [`Store`](crate::Store).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the main store file. `.backup` and `.tmp` siblings live next to it.
    pub path: PathBuf,

    /// Gzip the serialized document before writing (default: false)
    pub compression: bool,

    /// Encrypt the (possibly compressed) document (default: false)
    pub encryption: bool,

    /// Passphrase for encryption; required when `encryption` is set
    pub encryption_key: Option<String>,

    /// Flush automatically after mutations (default: true)
    pub auto_save: bool,

    /// Debounce delay between a mutation and the automatic flush (default: 1s)
    pub auto_save_interval: Duration,

    /// Interval of the background expiry sweep; zero disables it (default: 60s)
    pub ttl_cleanup_interval: Duration,

    /// Write indented JSON instead of compact JSON (default: false)
    pub pretty: bool,

    /// Shutdown hooks the store registers its exit flush with
    pub lifecycle: Option<Arc<Lifecycle>>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_FILE),
            compression: false,
            encryption: false,
            encryption_key: None,
            auto_save: true,
            auto_save_interval: Duration::from_secs(1),
            ttl_cleanup_interval: Duration::from_secs(60),
            pretty: false,
            lifecycle: None,
        }
    }
}

impl StoreConfig {
    /// Creates a default configuration for the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Enables encryption with the given passphrase.
    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption = true;
        self.encryption_key = Some(key.into());
        self
    }

    pub fn with_auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = enabled;
        self
    }

    pub fn with_auto_save_interval(mut self, interval: Duration) -> Self {
        self.auto_save_interval = interval;
        self
    }

    pub fn with_ttl_cleanup_interval(mut self, interval: Duration) -> Self {
        self.ttl_cleanup_interval = interval;
        self
    }

    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<Lifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Checks the configuration for combinations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(StoreError::Configuration("store path must not be empty".into()));
        }
        if self.encryption && self.encryption_key.as_deref().map_or(true, str::is_empty) {
            return Err(StoreError::Configuration(
                "encryption is enabled but no encryption key was provided".into(),
            ));
        }
        Ok(())
    }

    /// Builds the codec described by this configuration.
    pub fn codec(&self) -> Result<Codec> {
        self.validate()?;
        let cipher = match (&self.encryption, &self.encryption_key) {
            (true, Some(key)) => Some(Cipher::from_passphrase(key)),
            _ => None,
        };
        Ok(Codec::new(self.compression, cipher))
    }
}
