//! Batch Module
//!
//! Queued store writes, used to pipeline several engine operations into
//! one round trip.

use crate::store::StoreOp;

// == Batch ==
/// Ordered list of store writes awaiting [`CacheEngine::commit`].
///
/// Passing a batch to an engine operation enlists its writes instead of
/// running them. Reads still go to the store immediately. Order is kept, so
/// tag-before-write on put and delete-before-untag on invalidation hold
/// inside a batch as well.
///
/// [`CacheEngine::commit`]: crate::cache::CacheEngine::commit
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<StoreOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub(crate) fn push(&mut self, op: StoreOp) {
        self.ops.push(op);
    }

    /// Moves every queued op of `other` to the end of this batch.
    pub(crate) fn append(&mut self, other: &mut Batch) {
        self.ops.append(&mut other.ops);
    }

    pub(crate) fn take(&mut self) -> Vec<StoreOp> {
        std::mem::take(&mut self.ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_keeps_order_and_drains() {
        let mut first = Batch::new();
        first.push(StoreOp::Delete { key: "a".into() });

        let mut second = Batch::new();
        second.push(StoreOp::Delete { key: "b".into() });

        first.append(&mut second);
        assert!(second.is_empty());
        assert_eq!(
            first.ops(),
            &[
                StoreOp::Delete { key: "a".into() },
                StoreOp::Delete { key: "b".into() }
            ]
        );

        assert_eq!(first.take().len(), 2);
        assert!(first.is_empty());
    }
}
