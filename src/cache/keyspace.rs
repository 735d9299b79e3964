//! Store key layout for one cache instance.

use crate::store::escape_glob;

const ITEM_SEGMENT: &str = "item";
const SET_SEGMENT: &str = "set";

// == Keyspace ==
/// Maps cache keys and set names to namespaced store keys.
///
/// Layout: `{prefix}:item:{key}` for entries and `{prefix}:set:{name}` for
/// dependent-set membership records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn entry_key(&self, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, ITEM_SEGMENT, key)
    }

    pub fn set_key(&self, name: &str) -> String {
        format!("{}:{}:{}", self.prefix, SET_SEGMENT, name)
    }

    /// Recovers the cache key from an entry store key.
    pub fn key_from_entry_key<'a>(&self, store_key: &'a str) -> Option<&'a str> {
        store_key
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(':')?
            .strip_prefix(ITEM_SEGMENT)?
            .strip_prefix(':')
    }

    /// Pattern matching every entry key.
    pub fn entry_pattern(&self) -> String {
        format!("{}:{}:*", escape_glob(&self.prefix), ITEM_SEGMENT)
    }

    /// Pattern matching every set membership record.
    pub fn set_pattern(&self) -> String {
        format!("{}:{}:*", escape_glob(&self.prefix), SET_SEGMENT)
    }

    /// Pattern matching every key this cache owns.
    pub fn all_pattern(&self) -> String {
        format!("{}:*", escape_glob(&self.prefix))
    }
}
