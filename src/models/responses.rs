//! Response DTOs for the cache admin API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::CacheStats;

/// Response body for reading an item (GET /items/:key)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// Whether a live entry was found
    pub found: bool,
    /// The cached value, `null` when not found
    pub value: Option<serde_json::Value>,
}

impl GetResponse {
    pub fn new(key: impl Into<String>, value: Option<serde_json::Value>) -> Self {
        Self {
            key: key.into(),
            found: value.is_some(),
            value,
        }
    }
}

/// Response body for caching an item (PUT /items)
#[derive(Debug, Clone, Serialize)]
pub struct PutResponse {
    /// Success message
    pub message: String,
    /// The key that was cached
    pub key: String,
}

impl PutResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' cached", key),
            key,
        }
    }
}

/// Response body for item and set invalidation
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    pub message: String,
}

impl InvalidateResponse {
    pub fn item(key: &str) -> Self {
        Self {
            message: format!("Key '{}' invalidated", key),
        }
    }

    pub fn sets(sets: &[String]) -> Self {
        Self {
            message: format!("Sets [{}] invalidated", sets.join(", ")),
        }
    }
}

/// Response body for the purge endpoint (POST /purge)
#[derive(Debug, Clone, Serialize)]
pub struct PurgeResponse {
    /// Number of expired entries removed
    pub purged: usize,
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    /// Store keys owned by this cache, entries and set records alike
    pub key_count: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl StatsResponse {
    pub fn new(stats: CacheStats, key_count: usize) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            stats,
            key_count,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
