//! In-process store with the semantics the engine expects from Redis.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{glob_match, RemoteStore, StoreError, StoreOp};

#[derive(Debug, Clone)]
enum Slot {
    Bytes(Vec<u8>),
    Members(HashSet<String>),
}

// == Memory Store ==
/// Key-value store held in process memory.
///
/// Mirrors the parts of Redis the engine depends on: sets disappear when
/// their last member is removed, type mismatches are rejected, and `keys`
/// takes glob patterns. Used by tests and by the server when no Redis URL is
/// configured.
#[derive(Debug)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Slot>>,
    /// Number of calls that reached the store, failed or not
    operations: AtomicU64,
    reachable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    // == Constructor ==
    /// Creates an empty, reachable store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            operations: AtomicU64::new(0),
            reachable: AtomicBool::new(true),
        }
    }

    /// Creates a store that refuses every call, as if the server were down.
    pub fn unreachable() -> Self {
        let store = Self::new();
        store.set_reachable(false);
        store
    }

    /// Simulates the server going down or coming back.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Returns how many store calls have been made.
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    /// Returns the number of keys currently held, of any type.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    fn enter(&self) -> Result<(), StoreError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Connection("memory store is unreachable".to_string()))
        }
    }
}

// == Locked Operations ==
// Shared by the single-call methods and by `execute`, which applies a whole
// batch under one write lock.

type Data = HashMap<String, Slot>;

fn apply(data: &mut Data, op: StoreOp) -> Result<(), StoreError> {
    match op {
        StoreOp::Set { key, value } => {
            data.insert(key, Slot::Bytes(value));
            Ok(())
        }
        StoreOp::CompareAndSet {
            key,
            expected,
            value,
        } => compare_and_set(data, &key, &expected, value).map(|_| ()),
        StoreOp::Delete { key } => {
            data.remove(&key);
            Ok(())
        }
        StoreOp::AddMember { set, member } => add_member(data, &set, &member),
        StoreOp::RemoveMember { set, member } => remove_member(data, &set, &member),
        StoreOp::DeleteSet { set } => delete_set(data, &set),
    }
}

fn compare_and_set(
    data: &mut Data,
    key: &str,
    expected: &[u8],
    value: Vec<u8>,
) -> Result<bool, StoreError> {
    match data.get_mut(key) {
        Some(Slot::Bytes(current)) if current.as_slice() == expected => {
            *current = value;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn add_member(data: &mut Data, set: &str, member: &str) -> Result<(), StoreError> {
    match data
        .entry(set.to_string())
        .or_insert_with(|| Slot::Members(HashSet::new()))
    {
        Slot::Members(members) => {
            members.insert(member.to_string());
            Ok(())
        }
        Slot::Bytes(_) => Err(StoreError::WrongType(set.to_string())),
    }
}

fn remove_member(data: &mut Data, set: &str, member: &str) -> Result<(), StoreError> {
    take_member(data, set, member).map(|_| ())
}

/// Removes `member`, dropping the set once it is empty. Returns whether the
/// member was present.
fn take_member(data: &mut Data, set: &str, member: &str) -> Result<bool, StoreError> {
    let (removed, now_empty) = match data.get_mut(set) {
        Some(Slot::Members(members)) => {
            let removed = members.remove(member);
            (removed, members.is_empty())
        }
        Some(Slot::Bytes(_)) => return Err(StoreError::WrongType(set.to_string())),
        None => (false, false),
    };
    if now_empty {
        data.remove(set);
    }
    Ok(removed)
}

fn delete_set(data: &mut Data, set: &str) -> Result<(), StoreError> {
    if let Some(Slot::Bytes(_)) = data.get(set) {
        return Err(StoreError::WrongType(set.to_string()));
    }
    data.remove(set);
    Ok(())
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.enter()?;
        match self.data.read().await.get(key) {
            Some(Slot::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(Slot::Members(_)) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.enter()?;
        self.data
            .write()
            .await
            .insert(key.to_string(), Slot::Bytes(value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.enter()?;
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &[u8],
        value: Vec<u8>,
    ) -> Result<bool, StoreError> {
        self.enter()?;
        compare_and_set(&mut *self.data.write().await, key, expected, value)
    }

    async fn add_set_member(&self, set: &str, member: &str) -> Result<(), StoreError> {
        self.enter()?;
        add_member(&mut *self.data.write().await, set, member)
    }

    async fn remove_set_member(&self, set: &str, member: &str) -> Result<(), StoreError> {
        self.enter()?;
        remove_member(&mut *self.data.write().await, set, member)
    }

    async fn prune_member(
        &self,
        set: &str,
        member: &str,
        entry_key: &str,
    ) -> Result<bool, StoreError> {
        self.enter()?;
        let mut data = self.data.write().await;
        if data.contains_key(entry_key) {
            return Ok(false);
        }
        take_member(&mut data, set, member)
    }

    async fn members(&self, set: &str) -> Result<Vec<String>, StoreError> {
        self.enter()?;
        match self.data.read().await.get(set) {
            Some(Slot::Members(members)) => Ok(members.iter().cloned().collect()),
            Some(Slot::Bytes(_)) => Err(StoreError::WrongType(set.to_string())),
            None => Ok(Vec::new()),
        }
    }

    async fn delete_set(&self, set: &str) -> Result<(), StoreError> {
        self.enter()?;
        delete_set(&mut *self.data.write().await, set)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.enter()?;
        Ok(self
            .data
            .read()
            .await
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn flush_all(&self) -> Result<(), StoreError> {
        self.enter()?;
        self.data.write().await.clear();
        Ok(())
    }

    /// Applies the whole batch under one write lock, so no other caller
    /// observes it half done. Stops at the first failure.
    async fn execute(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        for op in ops {
            self.enter()?;
            apply(&mut data, op)?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.set_reachable(false);
        Ok(())
    }
}
