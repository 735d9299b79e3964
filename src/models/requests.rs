//! Request DTOs for the cache admin API
//!
//! Defines the structure of incoming HTTP request bodies.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;

use crate::cache::Expiration;
use crate::error::{CacheError, Result};

/// Request body for caching an item (PUT /items)
///
/// Omitted expirations never trigger. `sliding_secs` may be zero or negative,
/// which stores an entry that is already expired.
#[derive(Debug, Clone, Deserialize)]
pub struct PutItemRequest {
    /// The cache key
    pub key: String,
    /// Any JSON value
    pub value: serde_json::Value,
    /// Sets the entry is tagged with
    #[serde(default)]
    pub dependent_sets: Vec<String>,
    /// Sliding expiration window in seconds
    #[serde(default)]
    pub sliding_secs: Option<i64>,
    /// Absolute expiration instant (RFC 3339)
    #[serde(default)]
    pub absolute_expiration: Option<DateTime<Utc>>,
}

impl PutItemRequest {
    /// Builds the entry expiration from the optional request fields.
    pub fn expiration(&self) -> Result<Expiration> {
        let mut expiration = Expiration::never();
        if let Some(secs) = self.sliding_secs {
            expiration.sliding =
                TimeDelta::try_seconds(secs).ok_or(CacheError::InvalidArgument("sliding_secs"))?;
        }
        if let Some(deadline) = self.absolute_expiration {
            expiration.absolute = deadline;
        }
        Ok(expiration)
    }
}

/// Request body for set invalidation (POST /sets/invalidate)
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidateSetsRequest {
    pub sets: Vec<String>,
}
