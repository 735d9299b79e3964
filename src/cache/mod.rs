//! Cache Module
//!
//! Second-level cache engine with sliding/absolute expiration and
//! dependent-set invalidation over a remote key-value store.

mod batch;
mod clock;
mod engine;
mod entry;
mod keyspace;
mod notify;
mod policy;
mod sets;
mod stats;


// Re-export public types
pub use batch::Batch;
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{CacheEngine, EngineOptions};
pub use entry::CacheEntry;
pub use keyspace::Keyspace;
pub use notify::{CachingFailed, FailureNotifier, FailureObserver};
pub use policy::{is_expired, Expiration};
pub use sets::SetIndex;
pub use stats::{CacheStats, StatsRecorder};
