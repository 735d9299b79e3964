//! Per-call timeout decorator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{RemoteStore, StoreError, StoreOp};

// == Timeout Store ==
/// Wraps a store so that no call waits longer than `timeout`.
///
/// An elapsed call surfaces as [`StoreError::Timeout`], which the engine
/// treats like any other connectivity failure.
pub struct TimeoutStore {
    inner: Arc<dyn RemoteStore>,
    timeout: Duration,
}

impl TimeoutStore {
    pub fn new(inner: Arc<dyn RemoteStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl RemoteStore for TimeoutStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.bounded(self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.bounded(self.inner.set(key, value)).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.bounded(self.inner.delete(key)).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &[u8],
        value: Vec<u8>,
    ) -> Result<bool, StoreError> {
        self.bounded(self.inner.compare_and_set(key, expected, value))
            .await
    }

    async fn add_set_member(&self, set: &str, member: &str) -> Result<(), StoreError> {
        self.bounded(self.inner.add_set_member(set, member)).await
    }

    async fn remove_set_member(&self, set: &str, member: &str) -> Result<(), StoreError> {
        self.bounded(self.inner.remove_set_member(set, member)).await
    }

    async fn prune_member(
        &self,
        set: &str,
        member: &str,
        entry_key: &str,
    ) -> Result<bool, StoreError> {
        self.bounded(self.inner.prune_member(set, member, entry_key))
            .await
    }

    async fn members(&self, set: &str) -> Result<Vec<String>, StoreError> {
        self.bounded(self.inner.members(set)).await
    }

    async fn delete_set(&self, set: &str) -> Result<(), StoreError> {
        self.bounded(self.inner.delete_set(set)).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.bounded(self.inner.keys(pattern)).await
    }

    async fn flush_all(&self) -> Result<(), StoreError> {
        self.bounded(self.inner.flush_all()).await
    }

    async fn execute(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        self.bounded(self.inner.execute(ops)).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.bounded(self.inner.close()).await
    }
}
