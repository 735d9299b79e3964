//! Redis backend over a multiplexed tokio connection.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use tracing::info;

use super::{RemoteStore, StoreError, StoreOp};

/// Swaps KEYS[1] to ARGV[2] only while it still equals ARGV[1].
const COMPARE_AND_SET: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// Removes ARGV[1] from set KEYS[1] only while entry KEYS[2] is absent.
const PRUNE_MEMBER: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 0 then
    return redis.call('SREM', KEYS[1], ARGV[1])
end
return 0
"#;

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            StoreError::Connection(err.to_string())
        } else if err.code() == Some("WRONGTYPE") {
            StoreError::WrongType(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

// == Redis Store ==
/// Store backed by a Redis server.
///
/// Holds one [`ConnectionManager`], which multiplexes every call over a
/// single connection and reconnects on its own after drops.
pub struct RedisStore {
    connection: ConnectionManager,
    compare_and_set: Script,
    prune_member: Script,
    closed: AtomicBool,
}

impl RedisStore {
    // == Constructor ==
    /// Opens a connection to the server at `url` (e.g. `redis://127.0.0.1/`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        info!("Connected to Redis at {}", url);

        Ok(Self {
            connection,
            compare_and_set: Script::new(COMPARE_AND_SET),
            prune_member: Script::new(PRUNE_MEMBER),
            closed: AtomicBool::new(false),
        })
    }

    fn connection(&self) -> Result<ConnectionManager, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(self.connection.clone())
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut con = self.connection()?;
        let value: Option<Vec<u8>> = con.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut con = self.connection()?;
        let _: () = con.set(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut con = self.connection()?;
        let _: () = con.del(key).await?;
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &[u8],
        value: Vec<u8>,
    ) -> Result<bool, StoreError> {
        let mut con = self.connection()?;
        let swapped: i64 = self
            .compare_and_set
            .key(key)
            .arg(expected)
            .arg(value)
            .invoke_async(&mut con)
            .await?;
        Ok(swapped == 1)
    }

    async fn add_set_member(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut con = self.connection()?;
        let _: () = con.sadd(set, member).await?;
        Ok(())
    }

    async fn remove_set_member(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut con = self.connection()?;
        let _: () = con.srem(set, member).await?;
        Ok(())
    }

    async fn prune_member(
        &self,
        set: &str,
        member: &str,
        entry_key: &str,
    ) -> Result<bool, StoreError> {
        let mut con = self.connection()?;
        let removed: i64 = self
            .prune_member
            .key(set)
            .key(entry_key)
            .arg(member)
            .invoke_async(&mut con)
            .await?;
        Ok(removed == 1)
    }

    async fn members(&self, set: &str) -> Result<Vec<String>, StoreError> {
        let mut con = self.connection()?;
        let members: Vec<String> = con.smembers(set).await?;
        Ok(members)
    }

    async fn delete_set(&self, set: &str) -> Result<(), StoreError> {
        self.delete(set).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut con = self.connection()?;
        let keys: Vec<String> = con.keys(pattern).await?;
        Ok(keys)
    }

    async fn flush_all(&self) -> Result<(), StoreError> {
        let mut con = self.connection()?;
        let _: () = redis::cmd("FLUSHDB").query_async(&mut con).await?;
        Ok(())
    }

    /// Sends every operation in one MULTI/EXEC pipeline.
    async fn execute(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                StoreOp::Set { key, value } => {
                    pipe.set(key, value).ignore();
                }
                StoreOp::CompareAndSet {
                    key,
                    expected,
                    value,
                } => {
                    pipe.cmd("EVAL")
                        .arg(COMPARE_AND_SET)
                        .arg(1)
                        .arg(key)
                        .arg(expected)
                        .arg(value)
                        .ignore();
                }
                StoreOp::Delete { key } | StoreOp::DeleteSet { set: key } => {
                    pipe.del(key).ignore();
                }
                StoreOp::AddMember { set, member } => {
                    pipe.sadd(set, member).ignore();
                }
                StoreOp::RemoveMember { set, member } => {
                    pipe.srem(set, member).ignore();
                }
            }
        }

        let mut con = self.connection()?;
        let _: () = pipe.query_async(&mut con).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Redis connection closed");
        }
        Ok(())
    }
}
