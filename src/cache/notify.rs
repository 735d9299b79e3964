//! Failure Notification Module
//!
//! Operational failures never fail an engine call. They are published here
//! instead, for callers that want to log, count or escalate them.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use crate::error::CacheError;

/// Buffered notifications per subscriber before the oldest are dropped.
const CHANNEL_CAPACITY: usize = 256;

// == Caching Failed ==
/// Notification raised for every non-fatal operational failure.
#[derive(Debug, Clone)]
pub struct CachingFailed {
    /// Engine operation that failed, e.g. `GetItem`
    pub operation: &'static str,
    /// `"Caching failed for <operation>"`
    pub message: String,
    /// Underlying failure
    pub cause: Arc<CacheError>,
}

impl CachingFailed {
    pub fn new(operation: &'static str, cause: CacheError) -> Self {
        Self {
            operation,
            message: format!("Caching failed for {}", operation),
            cause: Arc::new(cause),
        }
    }
}

impl fmt::Display for CachingFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.message, self.cause)
    }
}

// == Failure Observer ==
/// Receives failure notifications synchronously, on the calling task.
pub trait FailureObserver: Send + Sync {
    fn caching_failed(&self, failure: &CachingFailed);
}

// == Failure Notifier ==
/// Fans a failure out to the log, registered observers and channel
/// subscribers.
pub struct FailureNotifier {
    sender: broadcast::Sender<CachingFailed>,
    observers: Vec<Arc<dyn FailureObserver>>,
}

impl Default for FailureNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn FailureObserver>) {
        self.observers.push(observer);
    }

    /// Opens a new subscription. Only failures raised after this call are
    /// delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<CachingFailed> {
        self.sender.subscribe()
    }

    pub fn notify(&self, failure: CachingFailed) {
        warn!(
            operation = failure.operation,
            cause = %failure.cause,
            "{}", failure.message
        );
        for observer in &self.observers {
            observer.caching_failed(&failure);
        }
        // No subscribers is not an error
        let _ = self.sender.send(failure);
    }
}
