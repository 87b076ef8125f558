//! TTL Index
//!
//! Tracks the absolute expiry instant (Unix epoch milliseconds) of every key
//! that has a finite lifetime. Keys without a record never expire.
//!
//! Expiry queries are answered from this index alone, without touching the
//! entry map. Finding expired keys is a linear scan rather than a priority
//! queue; an embedded store holds few enough keys that the scan is cheap and
//! the index stays a plain map.
//!
//! An expiry instant equal to "now" counts as expired.

use crate::error::{Result, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Rejects zero-length lifetimes.
pub fn validate_ttl(ttl: Duration) -> Result<()> {
    if ttl.is_zero() {
        return Err(StoreError::Validation("ttl must be greater than 0".into()));
    }
    Ok(())
}

/// Converts a TTL given in (possibly fractional) seconds to a `Duration`.
///
/// Rejects NaN, infinities, negatives and zero.
pub fn ttl_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(StoreError::Validation(format!(
            "ttl must be a finite number of seconds greater than 0, got {secs}"
        )));
    }
    let ttl = Duration::try_from_secs_f64(secs)
        .map_err(|e| StoreError::Validation(format!("ttl out of range: {e}")))?;
    validate_ttl(ttl)?;
    Ok(ttl)
}

/// Rounds a duration up to whole milliseconds so sub-millisecond TTLs do not
/// expire on the spot.
fn ceil_millis(ttl: Duration) -> u64 {
    let millis = ttl.as_nanos().div_ceil(1_000_000);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// Key → absolute expiry instant.
#[derive(Debug, Clone, Default)]
pub struct TtlIndex {
    expirations: HashMap<String, u64>,
}

impl TtlIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `key` expires `ttl` from now. Returns the expiry instant.
    pub fn set_ttl(&mut self, key: &str, ttl: Duration) -> u64 {
        let expires_at = epoch_millis().saturating_add(ceil_millis(ttl));
        self.expirations.insert(key.to_string(), expires_at);
        expires_at
    }

    /// Records an absolute expiry instant for `key`.
    pub fn set_expires_at(&mut self, key: &str, expires_at: u64) {
        self.expirations.insert(key.to_string(), expires_at);
    }

    /// Returns the absolute expiry instant of `key`, if it has one.
    pub fn expires_at(&self, key: &str) -> Option<u64> {
        self.expirations.get(key).copied()
    }

    /// Returns the remaining lifetime of `key`.
    ///
    /// `None` if the key has no record or has already expired.
    pub fn get_ttl(&self, key: &str) -> Option<Duration> {
        self.remaining_at(key, epoch_millis())
    }

    fn remaining_at(&self, key: &str, now: u64) -> Option<Duration> {
        let expires_at = self.expires_at(key)?;
        if expires_at <= now {
            return None;
        }
        Some(Duration::from_millis(expires_at - now))
    }

    /// Removes the record for `key`. Returns true if one existed.
    pub fn clear_ttl(&mut self, key: &str) -> bool {
        self.expirations.remove(key).is_some()
    }

    /// Returns true if `key` has a record whose instant has passed.
    pub fn is_expired(&self, key: &str) -> bool {
        self.is_expired_at(key, epoch_millis())
    }

    fn is_expired_at(&self, key: &str, now: u64) -> bool {
        self.expirations
            .get(key)
            .map(|&expires_at| expires_at <= now)
            .unwrap_or(false)
    }

    /// Scans every record and returns the keys that have expired.
    pub fn expired_keys(&self) -> Vec<String> {
        self.expired_keys_at(epoch_millis())
    }

    fn expired_keys_at(&self, now: u64) -> Vec<String> {
        self.expirations
            .iter()
            .filter(|(_, &expires_at)| expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Drops the records of every key in `keys`.
    pub fn remove_expired_keys(&mut self, keys: &[String]) {
        for key in keys {
            self.expirations.remove(key);
        }
    }

    /// Returns every live record, for serialization.
    ///
    /// Records that have already expired are left out so a saved document
    /// never carries a TTL for a key past its expiry.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.snapshot_at(epoch_millis())
    }

    fn snapshot_at(&self, now: u64) -> BTreeMap<String, u64> {
        self.expirations
            .iter()
            .filter(|(_, &expires_at)| expires_at > now)
            .map(|(key, &expires_at)| (key.clone(), expires_at))
            .collect()
    }

    /// Replaces the whole index with `records`.
    pub fn load(&mut self, records: impl IntoIterator<Item = (String, u64)>) {
        self.expirations = records.into_iter().collect();
    }

    pub fn clear(&mut self) {
        self.expirations.clear();
    }

    pub fn len(&self) -> usize {
        self.expirations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expirations.is_empty()
    }
}
