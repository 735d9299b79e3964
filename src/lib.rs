//! L2 Cache - A second-level cache over a remote key-value store
//!
//! Caches serialized values with sliding and absolute expiration, tags them
//! with dependent entity sets for group invalidation, and purges expired
//! entries in the background.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod tasks;

pub use api::{create_router, AppState};
pub use cache::{Batch, CacheEngine, CachingFailed, EngineOptions, Expiration};
pub use config::Config;
pub use error::{CacheError, Result};
pub use store::{MemoryStore, RemoteStore, StoreError};
pub use tasks::spawn_purge_task;
