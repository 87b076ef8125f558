//! The serialized form of a store.
//!
//! ```json
//! { "data": { "<key>": <value>, ... },
//!   "ttl":  { "<key>": <epochMillis>, ... },
//!   "version": "1.0.0",
//!   "timestamp": <epochMillis> }
//! ```
//!
//! Maps are `BTreeMap`s so the same state always renders to the same text.

use crate::error::Result;
use crate::storage::ttl::epoch_millis;
use crate::Value;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Schema tag written into every document.
pub const FORMAT_VERSION: &str = "1.0.0";

/// One complete snapshot of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub data: BTreeMap<String, Value>,
    #[serde(default)]
    pub ttl: BTreeMap<String, u64>,
    pub version: String,
    #[serde(default)]
    pub timestamp: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::empty()
    }
}

impl Document {
    /// Builds a document stamped with the current time.
    ///
    /// TTL records whose key is not in `data` are dropped.
    pub fn new(data: BTreeMap<String, Value>, mut ttl: BTreeMap<String, u64>) -> Self {
        ttl.retain(|key, _| data.contains_key(key));
        Self {
            data,
            ttl,
            version: FORMAT_VERSION.to_string(),
            timestamp: epoch_millis(),
        }
    }

    /// The document a store starts from when no file exists yet.
    pub fn empty() -> Self {
        Self::new(BTreeMap::new(), BTreeMap::new())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Renders the document as JSON text.
    pub fn to_bytes(&self, pretty: bool) -> Result<Bytes> {
        let text = if pretty {
            serde_json::to_vec_pretty(self)?
        } else {
            serde_json::to_vec(self)?
        };
        Ok(Bytes::from(text))
    }

    /// Parses JSON text produced by [`Document::to_bytes`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let mut doc: Document = serde_json::from_slice(bytes)?;
        if doc.version != FORMAT_VERSION {
            warn!(
                version = %doc.version,
                expected = FORMAT_VERSION,
                "Reading store document with unexpected format version"
            );
        }
        let data = &doc.data;
        doc.ttl.retain(|key, _| data.contains_key(key));
        Ok(doc)
    }
}
