//! Cache Engine Module
//!
//! Orchestrates put, get, invalidation and purge over a remote store, using
//! the entry codec, the expiration policy and the set index.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::{
    Batch, CacheEntry, CacheStats, CachingFailed, Clock, Expiration, FailureNotifier,
    FailureObserver, Keyspace, SetIndex, StatsRecorder, SystemClock,
};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::store::{RemoteStore, StoreError, StoreOp, TimeoutStore};

const PUT_ITEM: &str = "PutItem";
const GET_ITEM: &str = "GetItem";
const INVALIDATE_ITEM: &str = "InvalidateItem";
const INVALIDATE_SETS: &str = "InvalidateSets";
const PURGE: &str = "Purge";
const COUNT: &str = "Count";
const COMMIT: &str = "Commit";
const FLUSH_ALL: &str = "FlushAll";
const SHUTDOWN: &str = "Shutdown";

// == Engine Options ==
/// Settings for a [`CacheEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Namespace for every store key this engine touches
    pub key_prefix: String,
    /// Upper bound for each store call; `None` waits indefinitely
    pub operation_timeout: Option<Duration>,
    /// Permits [`CacheEngine::flush_all`]
    pub allow_admin: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            key_prefix: "l2cache".to_string(),
            operation_timeout: Some(Duration::from_secs(5)),
            allow_admin: false,
        }
    }
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            key_prefix: config.key_prefix.clone(),
            operation_timeout: Some(Duration::from_millis(config.store_timeout_ms)),
            allow_admin: config.allow_admin,
        }
    }
}

// == Cache Engine ==
/// Second-level cache over a [`RemoteStore`].
///
/// The engine keeps no cached data in process, so it can be shared freely
/// between tasks. Argument errors are returned synchronously; store and
/// serialization failures are reported through [`CachingFailed`] and the
/// operation behaves as if nothing was cached.
///
/// Multi-key sequences are ordered so that an entry is never readable while
/// missing from one of its sets: puts tag before writing the entry, removals
/// delete the entry before untagging.
pub struct CacheEngine {
    store: Arc<dyn RemoteStore>,
    keyspace: Keyspace,
    sets: SetIndex,
    clock: Arc<dyn Clock>,
    notifier: FailureNotifier,
    stats: StatsRecorder,
    allow_admin: bool,
}

impl CacheEngine {
    // == Constructor ==
    /// Creates an engine sharing ownership of `store`.
    pub fn new(store: Arc<dyn RemoteStore>, options: EngineOptions) -> Self {
        let store = match options.operation_timeout {
            Some(timeout) => Arc::new(TimeoutStore::new(store, timeout)) as Arc<dyn RemoteStore>,
            None => store,
        };
        let keyspace = Keyspace::new(options.key_prefix);

        Self {
            store,
            sets: SetIndex::new(keyspace.clone()),
            keyspace,
            clock: Arc::new(SystemClock),
            notifier: FailureNotifier::new(),
            stats: StatsRecorder::new(),
            allow_admin: options.allow_admin,
        }
    }

    /// Creates an engine from server configuration.
    pub fn from_config(store: Arc<dyn RemoteStore>, config: &Config) -> Self {
        Self::new(store, EngineOptions::from(config))
    }

    /// Replaces the time source used for expiration.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers an observer for [`CachingFailed`] notifications.
    pub fn with_observer(mut self, observer: Arc<dyn FailureObserver>) -> Self {
        self.notifier.add_observer(observer);
        self
    }

    /// Subscribes to [`CachingFailed`] notifications raised from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CachingFailed> {
        self.notifier.subscribe()
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    // == Put Item ==
    /// Caches `value` under `key`, tagged with every name in `dependent_sets`.
    ///
    /// Replaces any existing entry for `key`. With a batch, the writes are
    /// queued until [`CacheEngine::commit`].
    pub async fn put_item<T, S>(
        &self,
        key: &str,
        value: &T,
        dependent_sets: &[S],
        expiration: Expiration,
        batch: Option<&mut Batch>,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
        S: AsRef<str>,
    {
        require_key(key)?;
        require_set_names(dependent_sets, "dependent_sets")?;

        let sets: BTreeSet<String> = dependent_sets
            .iter()
            .map(|name| name.as_ref().to_string())
            .collect();

        if let Err(err) = self.try_put(key, value, sets, expiration, batch).await {
            self.fail(PUT_ITEM, err);
        }
        Ok(())
    }

    async fn try_put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        sets: BTreeSet<String>,
        expiration: Expiration,
        batch: Option<&mut Batch>,
    ) -> Result<()> {
        // Encode fully before any write so a failure leaves the store untouched
        let entry = CacheEntry::from_value(key, value, sets, expiration, self.clock.now())?;
        let bytes = entry.encode()?;

        let store_key = self.keyspace.entry_key(key);
        let stale = self.stale_sets(key, &store_key, &entry.dependent_sets).await?;

        let mut ops = Batch::new();
        self.sets
            .tag(&mut ops, key, entry.dependent_sets.iter().map(String::as_str));
        ops.push(StoreOp::Set {
            key: store_key,
            value: bytes,
        });
        // Untag dropped sets only after the new entry is written
        self.sets.untag_all(&mut ops, key, stale.iter().map(String::as_str));

        self.submit(ops, batch).await?;
        debug!("Cached '{}' in {} sets", key, entry.dependent_sets.len());
        Ok(())
    }

    /// Returns the sets the entry currently under `key` is tagged with but
    /// `sets` no longer includes.
    async fn stale_sets(
        &self,
        key: &str,
        store_key: &str,
        sets: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let Some(bytes) = self.store.get(store_key).await? else {
            return Ok(Vec::new());
        };
        // An unreadable entry cannot say which sets it was in
        let Ok(previous) = CacheEntry::decode(key, &bytes) else {
            return Ok(Vec::new());
        };
        Ok(previous
            .dependent_sets
            .difference(sets)
            .cloned()
            .collect())
    }

    // == Get Item ==
    /// Returns the live value cached under `key`, refreshing its sliding
    /// window.
    ///
    /// Expired entries are removed on the way. Any operational failure yields
    /// `Ok(None)` plus a notification.
    pub async fn get_item<T: DeserializeOwned>(
        &self,
        key: &str,
        batch: Option<&mut Batch>,
    ) -> Result<Option<T>> {
        require_key(key)?;

        match self.try_get(key, batch).await {
            Ok(Some(value)) => {
                self.stats.record_hit();
                Ok(Some(value))
            }
            Ok(None) => {
                self.stats.record_miss();
                Ok(None)
            }
            Err(err) => {
                self.stats.record_miss();
                self.fail(GET_ITEM, err);
                Ok(None)
            }
        }
    }

    async fn try_get<T: DeserializeOwned>(
        &self,
        key: &str,
        batch: Option<&mut Batch>,
    ) -> Result<Option<T>> {
        let store_key = self.keyspace.entry_key(key);
        let Some(bytes) = self.store.get(&store_key).await? else {
            return Ok(None);
        };

        let mut entry = match CacheEntry::decode(key, &bytes) {
            Ok(entry) => entry,
            Err(err) => {
                // Unreadable entries can never be served
                self.store.delete(&store_key).await?;
                return Err(err);
            }
        };

        let now = self.clock.now();
        let mut ops = Batch::new();

        if entry.is_expired(now) {
            self.remove_entry(&mut ops, &entry);
            self.submit(ops, batch).await?;
            self.stats.record_expirations(1);
            debug!("Entry '{}' expired on read", key);
            return Ok(None);
        }

        let value = entry.value::<T>()?;

        // Refresh only if nobody replaced the entry since it was read
        entry.touch(now);
        ops.push(StoreOp::CompareAndSet {
            key: store_key,
            expected: bytes,
            value: entry.encode()?,
        });
        self.submit(ops, batch).await?;

        Ok(Some(value))
    }

    // == Invalidate Item ==
    /// Removes the entry cached under `key` and its set tags.
    ///
    /// A missing key is a successful no-op.
    pub async fn invalidate_item(&self, key: &str, batch: Option<&mut Batch>) -> Result<()> {
        require_key(key)?;

        let mut ops = Batch::new();
        let outcome = match self.plan_removal(&mut ops, key).await {
            Ok(found) => self.submit(ops, batch).await.map(|_| found).map_err(CacheError::from),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(true) => {
                self.stats.record_invalidations(1);
                debug!("Invalidated '{}'", key);
            }
            Ok(false) => {}
            Err(err) => self.fail(INVALIDATE_ITEM, err),
        }
        Ok(())
    }

    // == Invalidate Sets ==
    /// Removes every entry tagged with any of `set_names`, then the set
    /// records themselves.
    ///
    /// Entries listed under several requested sets are removed once. A set
    /// record is only deleted when every one of its members was handled, so
    /// a failure never leaves an entry behind without its tag. All failures
    /// are reported in a single notification.
    pub async fn invalidate_sets<S: AsRef<str>>(
        &self,
        set_names: &[S],
        mut batch: Option<&mut Batch>,
    ) -> Result<()> {
        require_set_names(set_names, "set_names")?;

        let mut errors = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut removed = 0u64;

        for name in set_names.iter().map(|name| name.as_ref()) {
            let members = match self.sets.members(&*self.store, name).await {
                Ok(members) => members,
                Err(err) => {
                    errors.push(CacheError::from(err));
                    continue;
                }
            };

            let mut ops = Batch::new();
            let mut set_removed = 0u64;
            let mut complete = true;

            for member in members {
                if seen.contains(&member) {
                    continue;
                }
                match self.plan_removal(&mut ops, &member).await {
                    Ok(found) => {
                        if found {
                            set_removed += 1;
                        }
                        seen.insert(member);
                    }
                    Err(err) => {
                        complete = false;
                        errors.push(err);
                    }
                }
            }

            if complete {
                self.sets.delete_set(&mut ops, name);
            }

            match self.submit(ops, batch.as_deref_mut()).await {
                Ok(()) => removed += set_removed,
                Err(err) => errors.push(err.into()),
            }
        }

        self.stats.record_invalidations(removed);
        if removed > 0 {
            debug!("Invalidated {} entries across {} sets", removed, set_names.len());
        }

        self.fail_all(INVALIDATE_SETS, errors);
        Ok(())
    }

    // == Purge ==
    /// Deletes every entry that is expired now, with its set tags, then drops
    /// set members whose entry no longer exists.
    ///
    /// Live entries are left alone. Returns the number of entries removed.
    pub async fn purge(&self) -> usize {
        let now = self.clock.now();
        let store_keys = match self.store.keys(&self.keyspace.entry_pattern()).await {
            Ok(keys) => keys,
            Err(err) => {
                self.fail(PURGE, err.into());
                return 0;
            }
        };

        let mut purged = 0usize;
        let mut errors = Vec::new();

        for store_key in &store_keys {
            let Some(key) = self.keyspace.key_from_entry_key(store_key) else {
                continue;
            };
            match self.purge_entry(key, store_key, now).await {
                Ok(true) => purged += 1,
                Ok(false) => {}
                Err(err) => errors.push(err),
            }
        }

        self.stats.record_expirations(purged as u64);
        if purged > 0 {
            info!("Purge: removed {} of {} entries", purged, store_keys.len());
        } else {
            debug!("Purge: no expired entries among {}", store_keys.len());
        }

        match self.prune_sets().await {
            Ok(0) => {}
            Ok(pruned) => info!("Purge: dropped {} dangling set members", pruned),
            Err(mut prune_errors) => errors.append(&mut prune_errors),
        }

        self.fail_all(PURGE, errors);
        purged
    }

    /// Removes members left behind by interrupted puts or removals. Each
    /// removal is conditional on the entry still being absent in the store.
    async fn prune_sets(&self) -> std::result::Result<usize, Vec<CacheError>> {
        let set_keys = self
            .store
            .keys(&self.keyspace.set_pattern())
            .await
            .map_err(|err| vec![CacheError::from(err)])?;

        let mut pruned = 0usize;
        let mut errors = Vec::new();
        for set_key in &set_keys {
            let members = match self.store.members(set_key).await {
                Ok(members) => members,
                Err(err) => {
                    errors.push(err.into());
                    continue;
                }
            };
            for member in members {
                let entry_key = self.keyspace.entry_key(&member);
                match self.store.prune_member(set_key, &member, &entry_key).await {
                    Ok(true) => pruned += 1,
                    Ok(false) => {}
                    Err(err) => errors.push(err.into()),
                }
            }
        }

        if errors.is_empty() {
            Ok(pruned)
        } else {
            Err(errors)
        }
    }

    async fn purge_entry(
        &self,
        key: &str,
        store_key: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(bytes) = self.store.get(store_key).await? else {
            return Ok(false);
        };

        let mut ops = Batch::new();
        match CacheEntry::decode(key, &bytes) {
            Ok(entry) if entry.is_expired(now) => self.remove_entry(&mut ops, &entry),
            Ok(_) => return Ok(false),
            Err(err) => {
                warn!("Purge: removing unreadable entry '{}': {}", key, err);
                ops.push(StoreOp::Delete {
                    key: store_key.to_string(),
                });
            }
        }

        self.store.execute(ops.take()).await?;
        Ok(true)
    }

    // == Count ==
    /// Returns the raw number of store keys owned by this cache, entry keys
    /// and set records alike.
    pub async fn count(&self) -> usize {
        match self.store.keys(&self.keyspace.all_pattern()).await {
            Ok(keys) => keys.len(),
            Err(err) => {
                self.fail(COUNT, err.into());
                0
            }
        }
    }

    // == Commit ==
    /// Sends every write queued in `batch` and empties it.
    ///
    /// Returns false, after raising a notification, if the store failed.
    pub async fn commit(&self, batch: &mut Batch) -> bool {
        let ops = batch.take();
        if ops.is_empty() {
            return true;
        }

        let queued = ops.len();
        match self.store.execute(ops).await {
            Ok(()) => {
                debug!("Committed batch of {} writes", queued);
                true
            }
            Err(err) => {
                self.fail(COMMIT, err.into());
                false
            }
        }
    }

    // == Flush All ==
    /// Deletes everything in the store, not only this cache's keys.
    ///
    /// Refused unless the engine was built with `allow_admin`.
    pub async fn flush_all(&self) -> Result<()> {
        if !self.allow_admin {
            return Err(CacheError::AdminDisabled("flush_all"));
        }

        match self.store.flush_all().await {
            Ok(()) => warn!("Store flushed"),
            Err(err) => self.fail(FLUSH_ALL, err.into()),
        }
        Ok(())
    }

    // == Shutdown ==
    /// Closes the store connection. Later operations report connectivity
    /// failures.
    pub async fn shutdown(&self) {
        match self.store.close().await {
            Ok(()) => info!("Cache engine shut down"),
            Err(err) => self.fail(SHUTDOWN, err.into()),
        }
    }

    // == Helpers ==
    /// Reads the entry under `key` and queues its removal.
    ///
    /// Returns whether an entry was found.
    async fn plan_removal(&self, ops: &mut Batch, key: &str) -> Result<bool> {
        let store_key = self.keyspace.entry_key(key);
        let Some(bytes) = self.store.get(&store_key).await? else {
            return Ok(false);
        };

        match CacheEntry::decode(key, &bytes) {
            Ok(entry) => self.remove_entry(ops, &entry),
            Err(err) => {
                warn!("Removing unreadable entry '{}': {}", key, err);
                ops.push(StoreOp::Delete { key: store_key });
            }
        }
        Ok(true)
    }

    /// Queues deletion of `entry` followed by removal of its set tags.
    fn remove_entry(&self, ops: &mut Batch, entry: &CacheEntry) {
        ops.push(StoreOp::Delete {
            key: self.keyspace.entry_key(&entry.key),
        });
        self.sets.untag_all(
            ops,
            &entry.key,
            entry.dependent_sets.iter().map(String::as_str),
        );
    }

    /// Runs `ops` now, or enlists them in the caller's batch.
    async fn submit(
        &self,
        mut ops: Batch,
        batch: Option<&mut Batch>,
    ) -> std::result::Result<(), StoreError> {
        match batch {
            Some(batch) => {
                batch.append(&mut ops);
                Ok(())
            }
            None => self.store.execute(ops.take()).await,
        }
    }

    fn fail(&self, operation: &'static str, cause: CacheError) {
        self.stats.record_failure();
        self.notifier.notify(CachingFailed::new(operation, cause));
    }

    /// Raises one notification for all `errors`, unwrapped when there is
    /// only one.
    fn fail_all(&self, operation: &'static str, mut errors: Vec<CacheError>) {
        match errors.len() {
            0 => {}
            1 => {
                if let Some(err) = errors.pop() {
                    self.fail(operation, err);
                }
            }
            _ => self.fail(operation, CacheError::Aggregate(errors)),
        }
    }
}

// == Argument Validation ==
fn require_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidArgument("key"));
    }
    Ok(())
}

fn require_set_names<S: AsRef<str>>(names: &[S], argument: &'static str) -> Result<()> {
    if names.iter().any(|name| name.as_ref().is_empty()) {
        return Err(CacheError::InvalidArgument(argument));
    }
    Ok(())
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use std::sync::atomic::{AtomicBool, Ordering};

    const NO_SETS: &[&str] = &[];

    fn engine_with(store: Arc<MemoryStore>) -> (CacheEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = CacheEngine::new(
            store,
            EngineOptions {
                key_prefix: "test".to_string(),
                ..EngineOptions::default()
            },
        )
        .with_clock(clock.clone());
        (engine, clock)
    }

    /// Memory store that can be told to reject one kind of write.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_sets: AtomicBool,
        fail_untag: AtomicBool,
    }

    #[async_trait]
    impl RemoteStore for FlakyStore {
        async fn get(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: Vec<u8>) -> std::result::Result<(), StoreError> {
            if self.fail_sets.load(Ordering::SeqCst) {
                return Err(StoreError::Connection("dropped".into()));
            }
            self.inner.set(key, value).await
        }
        async fn delete(&self, key: &str) -> std::result::Result<(), StoreError> {
            self.inner.delete(key).await
        }
        async fn compare_and_set(
            &self,
            key: &str,
            expected: &[u8],
            value: Vec<u8>,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.compare_and_set(key, expected, value).await
        }
        async fn add_set_member(&self, set: &str, member: &str) -> std::result::Result<(), StoreError> {
            self.inner.add_set_member(set, member).await
        }
        async fn remove_set_member(
            &self,
            set: &str,
            member: &str,
        ) -> std::result::Result<(), StoreError> {
            if self.fail_untag.load(Ordering::SeqCst) {
                return Err(StoreError::Connection("dropped".into()));
            }
            self.inner.remove_set_member(set, member).await
        }
        async fn prune_member(
            &self,
            set: &str,
            member: &str,
            entry_key: &str,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.prune_member(set, member, entry_key).await
        }
        async fn members(&self, set: &str) -> std::result::Result<Vec<String>, StoreError> {
            self.inner.members(set).await
        }
        async fn delete_set(&self, set: &str) -> std::result::Result<(), StoreError> {
            self.inner.delete_set(set).await
        }
        async fn keys(&self, pattern: &str) -> std::result::Result<Vec<String>, StoreError> {
            self.inner.keys(pattern).await
        }
        async fn flush_all(&self) -> std::result::Result<(), StoreError> {
            self.inner.flush_all().await
        }
    }

    #[tokio::test]
    async fn test_put_tags_before_writing_entry() {
        let store = Arc::new(FlakyStore::default());
        store.fail_sets.store(true, Ordering::SeqCst);
        let engine = CacheEngine::new(store.clone(), EngineOptions::default());
        let mut failures = engine.subscribe();

        engine
            .put_item("k", &1, &["A"], Expiration::never(), None)
            .await
            .unwrap();

        // Entry write failed after tagging: tag dangles, entry absent
        assert_eq!(failures.try_recv().unwrap().message, "Caching failed for PutItem");
        assert_eq!(
            store.inner.members("l2cache:set:A").await.unwrap(),
            vec!["k".to_string()]
        );
        assert_eq!(store.inner.get("l2cache:item:k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_deletes_entry_before_untagging() {
        let store = Arc::new(FlakyStore::default());
        let engine = CacheEngine::new(store.clone(), EngineOptions::default());
        engine
            .put_item("k", &1, &["A"], Expiration::never(), None)
            .await
            .unwrap();

        store.fail_untag.store(true, Ordering::SeqCst);
        let mut failures = engine.subscribe();
        engine.invalidate_item("k", None).await.unwrap();

        assert_eq!(
            failures.try_recv().unwrap().message,
            "Caching failed for InvalidateItem"
        );
        assert_eq!(engine.get_item::<i32>("k", None).await.unwrap(), None);
        // Only the harmless dangling tag remains
        assert_eq!(engine.count().await, 1);
    }

    #[tokio::test]
    async fn test_serialization_failure_writes_nothing() {
        use std::collections::HashMap;

        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(store.clone());
        let mut failures = engine.subscribe();

        // JSON object keys must be strings
        let mut unserializable = HashMap::new();
        unserializable.insert(vec![1u8], "x");

        engine
            .put_item("k", &unserializable, &["A"], Expiration::never(), None)
            .await
            .unwrap();

        let failure = failures.try_recv().unwrap();
        assert!(matches!(*failure.cause, CacheError::Serialization(_)));
        assert_eq!(store.operations(), 0);
    }

    #[tokio::test]
    async fn test_get_with_wrong_type_reports_failure() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(store);
        engine
            .put_item("k", "text", NO_SETS, Expiration::never(), None)
            .await
            .unwrap();

        let mut failures = engine.subscribe();
        let value: Option<Vec<u64>> = engine.get_item("k", None).await.unwrap();
        assert_eq!(value, None);
        assert_eq!(failures.try_recv().unwrap().operation, "GetItem");
        assert_eq!(engine.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_get_removes_corrupt_entry() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(store.clone());
        store.set("test:item:k", vec![0xff]).await.unwrap();

        let mut failures = engine.subscribe();
        assert_eq!(engine.get_item::<i32>("k", None).await.unwrap(), None);
        assert!(matches!(
            *failures.try_recv().unwrap().cause,
            CacheError::CorruptEntry(_)
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_refresh_does_not_overwrite_concurrent_put() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(store.clone());
        engine
            .put_item("k", &1, NO_SETS, Expiration::never(), None)
            .await
            .unwrap();

        // Queue the refresh of a read of version 1, then replace the entry
        let mut batch = Batch::new();
        assert_eq!(engine.get_item::<i32>("k", Some(&mut batch)).await.unwrap(), Some(1));
        engine
            .put_item("k", &2, NO_SETS, Expiration::never(), None)
            .await
            .unwrap();
        assert!(engine.commit(&mut batch).await);

        assert_eq!(engine.get_item::<i32>("k", None).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_batch_defers_writes_until_commit() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(store.clone());

        let mut batch = Batch::new();
        engine
            .put_item("a", &1, &["S"], Expiration::never(), Some(&mut batch))
            .await
            .unwrap();
        engine
            .put_item("b", &2, &["S"], Expiration::never(), Some(&mut batch))
            .await
            .unwrap();

        // Only reads reached the store
        assert!(store.is_empty().await);
        assert_eq!(batch.len(), 4);
        assert_eq!(engine.get_item::<i32>("a", None).await.unwrap(), None);

        assert!(engine.commit(&mut batch).await);
        assert!(batch.is_empty());
        assert_eq!(engine.get_item::<i32>("a", None).await.unwrap(), Some(1));
        assert_eq!(engine.get_item::<i32>("b", None).await.unwrap(), Some(2));
        assert_eq!(engine.count().await, 3);
    }

    #[tokio::test]
    async fn test_batched_invalidation() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(store);
        engine
            .put_item("a", &1, &["S"], Expiration::never(), None)
            .await
            .unwrap();

        let mut batch = Batch::new();
        engine.invalidate_sets(&["S"], Some(&mut batch)).await.unwrap();
        assert_eq!(engine.count().await, 2);

        assert!(engine.commit(&mut batch).await);
        assert_eq!(engine.count().await, 0);
    }

    #[tokio::test]
    async fn test_commit_failure_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(store.clone());
        let mut batch = Batch::new();
        engine
            .put_item("a", &1, NO_SETS, Expiration::never(), Some(&mut batch))
            .await
            .unwrap();

        store.set_reachable(false);
        let mut failures = engine.subscribe();
        assert!(!engine.commit(&mut batch).await);
        assert_eq!(failures.try_recv().unwrap().message, "Caching failed for Commit");
        assert!(engine.commit(&mut batch).await);
    }

    #[tokio::test]
    async fn test_expired_get_untags_entry() {
        let store = Arc::new(MemoryStore::new());
        let (engine, clock) = engine_with(store.clone());
        engine
            .put_item(
                "k",
                &1,
                &["A", "B"],
                Expiration::sliding(TimeDelta::seconds(10)),
                None,
            )
            .await
            .unwrap();
        assert_eq!(engine.count().await, 3);

        clock.advance(TimeDelta::seconds(11));
        assert_eq!(engine.get_item::<i32>("k", None).await.unwrap(), None);
        assert_eq!(engine.count().await, 0);
        assert_eq!(engine.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_overwrite_untags_dropped_sets_after_write() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(store.clone());
        engine
            .put_item("k", &1, &["A", "B"], Expiration::never(), None)
            .await
            .unwrap();

        let mut batch = Batch::new();
        engine
            .put_item("k", &2, &["B", "C"], Expiration::never(), Some(&mut batch))
            .await
            .unwrap();

        let ops = batch.ops();
        let write = ops
            .iter()
            .position(|op| matches!(op, StoreOp::Set { .. }))
            .unwrap();
        let untag = ops
            .iter()
            .position(|op| matches!(op, StoreOp::RemoveMember { set, .. } if set == "test:set:A"))
            .unwrap();
        assert!(write < untag);
        assert!(!ops
            .iter()
            .any(|op| matches!(op, StoreOp::RemoveMember { set, .. } if set != "test:set:A")));

        assert!(engine.commit(&mut batch).await);
        assert!(store.members("test:set:A").await.unwrap().is_empty());
        assert_eq!(store.members("test:set:C").await.unwrap(), vec!["k".to_string()]);
        assert_eq!(engine.count().await, 3);
    }

    #[tokio::test]
    async fn test_overwrite_of_corrupt_entry_still_writes() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(store.clone());
        store.set("test:item:k", vec![0xff]).await.unwrap();

        let mut failures = engine.subscribe();
        engine
            .put_item("k", &5, &["A"], Expiration::never(), None)
            .await
            .unwrap();

        assert!(failures.try_recv().is_err());
        assert_eq!(engine.get_item::<i32>("k", None).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_sub_millisecond_sliding_window_is_live() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(store);
        engine
            .put_item(
                "k",
                &1,
                NO_SETS,
                Expiration::sliding(TimeDelta::microseconds(900)),
                None,
            )
            .await
            .unwrap();

        assert_eq!(engine.get_item::<i32>("k", None).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_purge_drops_dangling_set_members() {
        let store = Arc::new(FlakyStore::default());
        let engine = CacheEngine::new(store.clone(), EngineOptions::default());
        engine
            .put_item("live", &1, &["A"], Expiration::never(), None)
            .await
            .unwrap();

        // Tag written, entry write refused
        store.fail_sets.store(true, Ordering::SeqCst);
        engine
            .put_item("lost", &2, &["A", "B"], Expiration::never(), None)
            .await
            .unwrap();
        store.fail_sets.store(false, Ordering::SeqCst);
        assert_eq!(engine.count().await, 3);

        assert_eq!(engine.purge().await, 0);
        assert_eq!(
            store.inner.members("l2cache:set:A").await.unwrap(),
            vec!["live".to_string()]
        );
        assert_eq!(engine.count().await, 2);
        assert_eq!(engine.get_item::<i32>("live", None).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_purge_single_failure_is_not_aggregated() {
        let store = Arc::new(FlakyStore::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine =
            CacheEngine::new(store.clone(), EngineOptions::default()).with_clock(clock.clone());
        engine
            .put_item(
                "k",
                &1,
                &["A"],
                Expiration::sliding(TimeDelta::seconds(1)),
                None,
            )
            .await
            .unwrap();
        clock.advance(TimeDelta::seconds(2));

        // Entry delete succeeds, untag fails
        store.fail_untag.store(true, Ordering::SeqCst);
        let mut failures = engine.subscribe();
        engine.purge().await;

        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.operation, "Purge");
        assert!(matches!(
            *failure.cause,
            CacheError::Store(StoreError::Connection(_))
        ));
        assert!(failures.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_set_name_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(store.clone());

        let result = engine
            .put_item("k", &1, &["A", ""], Expiration::never(), None)
            .await;
        assert!(matches!(result, Err(CacheError::InvalidArgument("dependent_sets"))));

        let result = engine.invalidate_sets(&[""], None).await;
        assert!(matches!(result, Err(CacheError::InvalidArgument("set_names"))));
        assert_eq!(store.operations(), 0);
    }

    #[tokio::test]
    async fn test_flush_all_requires_admin() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(store.clone());
        assert!(matches!(
            engine.flush_all().await,
            Err(CacheError::AdminDisabled(_))
        ));

        let admin = CacheEngine::new(
            store.clone(),
            EngineOptions {
                allow_admin: true,
                ..EngineOptions::default()
            },
        );
        store.set("unrelated", vec![1]).await.unwrap();
        admin.flush_all().await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_shutdown_closes_store() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _) = engine_with(store);
        engine.shutdown().await;

        let mut failures = engine.subscribe();
        engine
            .put_item("k", &1, NO_SETS, Expiration::never(), None)
            .await
            .unwrap();
        assert!(failures.try_recv().unwrap().cause.is_connectivity());
    }
}
