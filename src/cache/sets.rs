//! Set Index Module
//!
//! Tracks which cache keys belong to each dependent entity set.

use crate::cache::{Batch, Keyspace};
use crate::store::{RemoteStore, StoreError, StoreOp};

// == Set Index ==
/// Membership records for dependent entity sets.
///
/// The index is derived data: it may list a key whose entry is already gone,
/// which is harmless, but an entry must never exist without being listed in
/// every set it was tagged with. Writes are therefore queued into a [`Batch`]
/// so the engine controls their order relative to entry writes.
#[derive(Debug, Clone)]
pub struct SetIndex {
    keyspace: Keyspace,
}

impl SetIndex {
    pub fn new(keyspace: Keyspace) -> Self {
        Self { keyspace }
    }

    // == Tag ==
    /// Queues adding `key` to each named set. Re-tagging is a no-op.
    pub fn tag<'a>(
        &self,
        batch: &mut Batch,
        key: &str,
        set_names: impl IntoIterator<Item = &'a str>,
    ) {
        for name in set_names {
            batch.push(StoreOp::AddMember {
                set: self.keyspace.set_key(name),
                member: key.to_string(),
            });
        }
    }

    // == Untag All ==
    /// Queues removing `key` from each named set.
    ///
    /// The store drops a set record once its last member is removed.
    pub fn untag_all<'a>(
        &self,
        batch: &mut Batch,
        key: &str,
        set_names: impl IntoIterator<Item = &'a str>,
    ) {
        for name in set_names {
            batch.push(StoreOp::RemoveMember {
                set: self.keyspace.set_key(name),
                member: key.to_string(),
            });
        }
    }

    /// Queues removal of the whole membership record of a set.
    pub fn delete_set(&self, batch: &mut Batch, set_name: &str) {
        batch.push(StoreOp::DeleteSet {
            set: self.keyspace.set_key(set_name),
        });
    }

    // == Members ==
    /// Reads the keys currently tagged with `set_name`.
    pub async fn members(
        &self,
        store: &dyn RemoteStore,
        set_name: &str,
    ) -> Result<Vec<String>, StoreError> {
        store.members(&self.keyspace.set_key(set_name)).await
    }
}
