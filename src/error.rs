//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
///
/// `InvalidArgument` is the only variant the engine returns to callers.
/// Every other variant reaches them as the cause of a
/// [`CachingFailed`](crate::cache::CachingFailed) notification.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Caller misuse, detected before any store interaction
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Value or entry could not be (de)serialized
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored entry bytes are not a valid entry
    #[error("Corrupt entry: {0}")]
    CorruptEntry(String),

    /// Remote store failure (unreachable, timed out, rejected)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Several independent steps of one operation failed
    #[error("{} operations failed, first: {}", .0.len(), .0.first().map(ToString::to_string).unwrap_or_default())]
    Aggregate(Vec<CacheError>),

    /// Destructive admin command refused by configuration
    #[error("Admin command disabled: {0}")]
    AdminDisabled(&'static str),
}

impl CacheError {
    /// Returns true if the failure, or any aggregated failure, is a
    /// connectivity problem with the store.
    pub fn is_connectivity(&self) -> bool {
        match self {
            CacheError::Store(err) => err.is_connectivity(),
            CacheError::Aggregate(errors) => errors.iter().any(CacheError::is_connectivity),
            _ => false,
        }
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CacheError::AdminDisabled(_) => StatusCode::FORBIDDEN,
            CacheError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Aggregate(_) if self.is_connectivity() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_invalid_argument_is_bad_request() {
        let response = CacheError::InvalidArgument("key").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_store_error_is_unavailable() {
        let err = CacheError::from(StoreError::Timeout(Duration::from_millis(10)));
        assert!(err.is_connectivity());
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_aggregate_message_names_first_failure() {
        let err = CacheError::Aggregate(vec![
            CacheError::Store(StoreError::Connection("refused".to_string())),
            CacheError::CorruptEntry("bad header".to_string()),
        ]);
        let message = err.to_string();
        assert!(message.starts_with("2 operations failed"));
        assert!(message.contains("refused"));
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_admin_disabled_is_forbidden() {
        let response = CacheError::AdminDisabled("flush_all").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
