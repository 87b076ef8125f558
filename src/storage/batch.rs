//! Batch Operations
//!
//! A batch is an ordered list of `set`/`delete` requests applied one after the
//! other. The wire shape matches what callers send as JSON:
//!
//! ```json
//! [ { "type": "set", "key": "a", "value": 1, "ttl": 30 },
//!   { "type": "delete", "key": "b" } ]
//! ```
//!
//! `ttl` is in seconds and may be fractional. Each operation produces a
//! [`BatchResult`] at the same position.

use crate::error::{Result, StoreError};
use crate::storage::store::validate_key;
use crate::storage::ttl::ttl_from_secs;
use crate::Value;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One request inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BatchOperation {
    Set {
        key: String,
        #[serde(default)]
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttl: Option<f64>,
    },
    Delete {
        key: String,
    },
}

/// Which kind of operation a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchOpKind {
    Set,
    Delete,
}

/// Outcome of one batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    #[serde(rename = "type")]
    pub kind: BatchOpKind,
    pub key: String,
    pub success: bool,
}

impl BatchOperation {
    pub fn set(key: impl Into<String>, value: impl Into<Value>) -> Self {
        BatchOperation::Set {
            key: key.into(),
            value: value.into(),
            ttl: None,
        }
    }

    pub fn set_with_ttl(key: impl Into<String>, value: impl Into<Value>, ttl_secs: f64) -> Self {
        BatchOperation::Set {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl_secs),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            BatchOperation::Set { key, .. } | BatchOperation::Delete { key } => key,
        }
    }

    pub fn kind(&self) -> BatchOpKind {
        match self {
            BatchOperation::Set { .. } => BatchOpKind::Set,
            BatchOperation::Delete { .. } => BatchOpKind::Delete,
        }
    }

    /// Checks the operation and returns its TTL as a `Duration`.
    pub(crate) fn validate(&self) -> Result<Option<Duration>> {
        validate_key(self.key())?;
        match self {
            BatchOperation::Set { ttl: Some(secs), .. } => ttl_from_secs(*secs).map(Some),
            _ => Ok(None),
        }
    }
}

/// Validates every operation up front, returning the parsed TTLs by position.
pub(crate) fn validate_all(operations: &[BatchOperation]) -> Result<Vec<Option<Duration>>> {
    operations
        .iter()
        .enumerate()
        .map(|(i, op)| {
            op.validate()
                .map_err(|e| StoreError::Validation(format!("batch operation {i}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_request() {
        let ops: Vec<BatchOperation> = serde_json::from_value(json!([
            { "type": "set", "key": "a", "value": { "n": 1 }, "ttl": 2.5 },
            { "type": "set", "key": "b" },
            { "type": "delete", "key": "c" }
        ]))
        .unwrap();

        assert_eq!(ops[0], BatchOperation::set_with_ttl("a", json!({ "n": 1 }), 2.5));
        assert_eq!(ops[1], BatchOperation::set("b", Value::Null));
        assert_eq!(ops[2], BatchOperation::delete("c"));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let parsed: std::result::Result<Vec<BatchOperation>, _> =
            serde_json::from_value(json!([{ "type": "upsert", "key": "a" }]));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_result_shape() {
        let result = BatchResult {
            kind: BatchOpKind::Delete,
            key: "x".into(),
            success: true,
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({ "type": "delete", "key": "x", "success": true })
        );
    }

    #[test]
    fn test_validate_all_reports_position() {
        let ops = vec![
            BatchOperation::set("ok", 1),
            BatchOperation::set_with_ttl("bad", 1, -3.0),
        ];
        let err = validate_all(&ops).unwrap_err();
        assert!(err.to_string().contains("batch operation 1"));

        let ops = vec![BatchOperation::delete("")];
        assert!(matches!(validate_all(&ops), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_validate_all_returns_ttls() {
        let ops = vec![
            BatchOperation::set_with_ttl("a", 1, 0.5),
            BatchOperation::delete("a"),
        ];
        let ttls = validate_all(&ops).unwrap();
        assert_eq!(ttls, vec![Some(Duration::from_millis(500)), None]);
    }
}
