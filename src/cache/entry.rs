//! Cache Entry Module
//!
//! Defines a cached item with its expiration metadata and set memberships,
//! and the byte format it is stored in.
//!
//! # Stored Format
//! ```text
//! +----------------+----------------------+------------------+
//! | header length  | header (JSON)        | payload          |
//! | u32 big-endian | sets, expiry, access | serialized value |
//! +----------------+----------------------+------------------+
//! ```
//! The payload is kept as opaque bytes so decoding metadata never requires
//! knowing the value type.

use std::collections::BTreeSet;

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::policy::{self, Expiration};
use crate::error::{CacheError, Result};

const HEADER_LEN_BYTES: usize = 4;

// == Cache Entry ==
/// A cached value plus the metadata needed to expire and invalidate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Caller-facing cache key (not the namespaced store key)
    pub key: String,
    /// Serialized value
    pub value: Vec<u8>,
    /// Dependent entity sets this entry is tagged with
    pub dependent_sets: BTreeSet<String>,
    pub sliding_expiration: TimeDelta,
    pub absolute_expiration: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct EntryHeader {
    #[serde(rename = "sets")]
    dependent_sets: BTreeSet<String>,
    #[serde(rename = "sliding_ms")]
    sliding_expiration_ms: i64,
    #[serde(rename = "absolute", with = "ts_milliseconds")]
    absolute_expiration: DateTime<Utc>,
    #[serde(rename = "accessed", with = "ts_milliseconds")]
    last_access: DateTime<Utc>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry whose last access is `now`.
    pub fn new(
        key: String,
        value: Vec<u8>,
        dependent_sets: BTreeSet<String>,
        expiration: Expiration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            value,
            dependent_sets,
            sliding_expiration: expiration.sliding,
            absolute_expiration: expiration.absolute,
            last_access: now,
        }
    }

    /// Serializes `value` and wraps it in a new entry.
    pub fn from_value<T: Serialize + ?Sized>(
        key: &str,
        value: &T,
        dependent_sets: BTreeSet<String>,
        expiration: Expiration,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(
            key.to_string(),
            payload,
            dependent_sets,
            expiration,
            now,
        ))
    }

    // == Is Expired ==
    /// Checks the entry against the expiration policy at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        policy::is_expired(self, now)
    }

    /// Records an access, restarting the sliding window.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_access = now;
    }

    /// Deserializes the stored value.
    pub fn value<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.value)?)
    }

    // == Encode ==
    /// Produces the stored representation. Runs entirely in memory.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let header = serde_json::to_vec(&EntryHeader {
            dependent_sets: self.dependent_sets.clone(),
            sliding_expiration_ms: delta_to_millis(self.sliding_expiration),
            absolute_expiration: self.absolute_expiration,
            last_access: self.last_access,
        })?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| CacheError::CorruptEntry("entry header too large".to_string()))?;

        let mut bytes = Vec::with_capacity(HEADER_LEN_BYTES + header.len() + self.value.len());
        bytes.extend_from_slice(&header_len.to_be_bytes());
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&self.value);
        Ok(bytes)
    }

    // == Decode ==
    /// Parses the stored representation of the entry cached under `key`.
    pub fn decode(key: &str, bytes: &[u8]) -> Result<Self> {
        let (len_bytes, rest) = bytes
            .split_first_chunk::<HEADER_LEN_BYTES>()
            .ok_or_else(|| CacheError::CorruptEntry(format!("entry '{}' is truncated", key)))?;
        let header_len = u32::from_be_bytes(*len_bytes) as usize;
        if rest.len() < header_len {
            return Err(CacheError::CorruptEntry(format!(
                "entry '{}' header overruns the entry",
                key
            )));
        }

        let (header, payload) = rest.split_at(header_len);
        let header: EntryHeader = serde_json::from_slice(header)?;

        Ok(Self {
            key: key.to_string(),
            value: payload.to_vec(),
            dependent_sets: header.dependent_sets,
            sliding_expiration: millis_to_delta(header.sliding_expiration_ms),
            absolute_expiration: header.absolute_expiration,
            last_access: header.last_access,
        })
    }
}

/// Converts a sliding window to whole milliseconds, rounding a positive
/// sub-millisecond remainder up so a live window never encodes as zero.
fn delta_to_millis(delta: TimeDelta) -> i64 {
    let ms = delta.num_milliseconds();
    match TimeDelta::try_milliseconds(ms) {
        Some(whole) if delta > whole => ms.saturating_add(1),
        _ => ms,
    }
}

/// Converts stored milliseconds back, saturating at the representable range.
fn millis_to_delta(ms: i64) -> TimeDelta {
    TimeDelta::try_milliseconds(ms).unwrap_or(if ms < 0 {
        TimeDelta::MIN
    } else {
        TimeDelta::MAX
    })
}
