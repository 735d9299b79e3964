//! Remote Store Module
//!
//! The key-value capability the cache engine is written against, plus the
//! backends that provide it.
//!
//! # Backends
//! - [`MemoryStore`] - in-process store with Redis-like semantics
//! - [`RedisStore`] - Redis over a multiplexed tokio connection (feature `redis`)
//! - [`TimeoutStore`] - decorator bounding every call of another store

mod memory;
mod pattern;
mod timeout;

#[cfg(feature = "redis")]
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use pattern::{escape_glob, glob_match};
pub use timeout::TimeoutStore;

#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

// == Store Error ==
/// Failure reported by a remote store call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The call did not complete within the configured timeout
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The store rejected the command
    #[error("Command failed: {0}")]
    Command(String),

    /// The key holds a value of another type
    #[error("Wrong type for key: {0}")]
    WrongType(String),

    /// The connection was shut down
    #[error("Connection closed")]
    Closed,
}

impl StoreError {
    /// Returns true for failures caused by reaching the store rather than by
    /// the command itself.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            StoreError::Connection(_) | StoreError::Timeout(_) | StoreError::Closed
        )
    }
}

// == Store Operation ==
/// A single queued write against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Set { key: String, value: Vec<u8> },
    /// Overwrites `key` only while it still holds `expected`.
    CompareAndSet {
        key: String,
        expected: Vec<u8>,
        value: Vec<u8>,
    },
    Delete { key: String },
    AddMember { set: String, member: String },
    RemoveMember { set: String, member: String },
    DeleteSet { set: String },
}

impl StoreOp {
    /// Applies this operation with individual store calls.
    pub async fn apply(self, store: &(impl RemoteStore + ?Sized)) -> Result<(), StoreError> {
        match self {
            StoreOp::Set { key, value } => store.set(&key, value).await,
            StoreOp::CompareAndSet {
                key,
                expected,
                value,
            } => store.compare_and_set(&key, &expected, value).await.map(|_| ()),
            StoreOp::Delete { key } => store.delete(&key).await,
            StoreOp::AddMember { set, member } => store.add_set_member(&set, &member).await,
            StoreOp::RemoveMember { set, member } => store.remove_set_member(&set, &member).await,
            StoreOp::DeleteSet { set } => store.delete_set(&set).await,
        }
    }
}

// == Remote Store ==
/// Capability over a remote key-value store.
///
/// Each call is atomic for the key it touches. Nothing is atomic across keys
/// except what a backend chooses to do in [`RemoteStore::execute`].
///
/// Sets follow Redis semantics: removing the last member deletes the set key.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Writes `value` only if `key` currently holds exactly `expected`.
    ///
    /// Returns whether the write happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: &[u8],
        value: Vec<u8>,
    ) -> Result<bool, StoreError>;

    async fn add_set_member(&self, set: &str, member: &str) -> Result<(), StoreError>;

    async fn remove_set_member(&self, set: &str, member: &str) -> Result<(), StoreError>;

    /// Removes `member` from `set` if `entry_key` does not exist, returning
    /// whether it was removed.
    ///
    /// The default checks and removes in two calls. Backends override it to
    /// do both atomically, so a member whose entry is written concurrently is
    /// never dropped.
    async fn prune_member(
        &self,
        set: &str,
        member: &str,
        entry_key: &str,
    ) -> Result<bool, StoreError> {
        if self.get(entry_key).await?.is_some() {
            return Ok(false);
        }
        let present = self.members(set).await?.iter().any(|m| m == member);
        if present {
            self.remove_set_member(set, member).await?;
        }
        Ok(present)
    }

    async fn members(&self, set: &str) -> Result<Vec<String>, StoreError>;

    async fn delete_set(&self, set: &str) -> Result<(), StoreError>;

    /// Lists keys matching a glob pattern (`*`, `?`, `[...]`, `\` escapes).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn flush_all(&self) -> Result<(), StoreError>;

    /// Runs queued operations in order, stopping at the first failure.
    ///
    /// Backends able to pipeline override this.
    async fn execute(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        for op in ops {
            op.apply(self).await?;
        }
        Ok(())
    }

    /// Tears down the connection. Later calls fail with [`StoreError::Closed`].
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
