//! Expiration Policy Module
//!
//! Decides whether an entry is still live from the expiration recorded at
//! write time and its last access.

use chrono::{DateTime, TimeDelta, Utc};

use crate::cache::CacheEntry;

// == Expiration ==
/// Sliding and absolute expiration chosen when an item is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiration {
    /// Rolling lifetime since last access. Zero or negative never keeps an
    /// entry alive; [`TimeDelta::MAX`] disables sliding expiration.
    pub sliding: TimeDelta,
    /// Fixed deadline. [`DateTime::<Utc>::MAX_UTC`] disables it.
    pub absolute: DateTime<Utc>,
}

impl Expiration {
    /// Expiration that never triggers.
    pub fn never() -> Self {
        Self {
            sliding: TimeDelta::MAX,
            absolute: DateTime::<Utc>::MAX_UTC,
        }
    }

    /// Sliding expiration only.
    pub fn sliding(window: TimeDelta) -> Self {
        Self {
            sliding: window,
            ..Self::never()
        }
    }

    /// Absolute expiration only.
    pub fn absolute(deadline: DateTime<Utc>) -> Self {
        Self {
            absolute: deadline,
            ..Self::never()
        }
    }
}

impl Default for Expiration {
    fn default() -> Self {
        Self::never()
    }
}

// == Is Expired ==
/// Returns true once the entry must be treated as absent at `now`.
///
/// Boundaries are inclusive: an entry is expired exactly at its absolute
/// deadline, and exactly when a full sliding window has elapsed.
pub fn is_expired(entry: &CacheEntry, now: DateTime<Utc>) -> bool {
    if now >= entry.absolute_expiration {
        return true;
    }
    if entry.sliding_expiration <= TimeDelta::zero() {
        return true;
    }
    now.signed_duration_since(entry.last_access) >= entry.sliding_expiration
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn entry(expiration: Expiration, last_access: DateTime<Utc>) -> CacheEntry {
        CacheEntry::new(
            "k".to_string(),
            b"v".to_vec(),
            BTreeSet::new(),
            expiration,
            last_access,
        )
    }

    #[test]
    fn test_never_expires() {
        let now = Utc::now();
        let e = entry(Expiration::never(), now);
        assert!(!is_expired(&e, now));
        assert!(!is_expired(&e, now + TimeDelta::days(365 * 100)));
    }

    #[test]
    fn test_absolute_boundary_is_inclusive() {
        let now = Utc::now();
        let e = entry(Expiration::absolute(now + TimeDelta::seconds(10)), now);
        assert!(!is_expired(&e, now + TimeDelta::seconds(9)));
        assert!(is_expired(&e, now + TimeDelta::seconds(10)));
    }

    #[test]
    fn test_absolute_in_the_past() {
        let now = Utc::now();
        let e = entry(Expiration::absolute(now - TimeDelta::minutes(10)), now);
        assert!(is_expired(&e, now));
    }

    #[test]
    fn test_non_positive_sliding_is_expired_immediately() {
        let now = Utc::now();
        assert!(is_expired(&entry(Expiration::sliding(TimeDelta::zero()), now), now));
        assert!(is_expired(
            &entry(Expiration::sliding(TimeDelta::seconds(-1)), now),
            now
        ));
    }

    #[test]
    fn test_sliding_window_boundary() {
        let now = Utc::now();
        let e = entry(Expiration::sliding(TimeDelta::seconds(10)), now);
        assert!(!is_expired(&e, now + TimeDelta::milliseconds(9_999)));
        assert!(is_expired(&e, now + TimeDelta::seconds(10)));
    }

    #[test]
    fn test_either_policy_expires() {
        let now = Utc::now();
        let e = entry(
            Expiration {
                sliding: TimeDelta::seconds(60),
                absolute: now + TimeDelta::seconds(5),
            },
            now,
        );
        // Sliding window still open, absolute deadline passed
        assert!(is_expired(&e, now + TimeDelta::seconds(6)));
    }
}
