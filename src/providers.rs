//! The provider seam of the ingest pipeline plus shared membership state.

use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::algod::models::SignedTxnInBlock;
use crate::error::Result;

/// A chain-indexing provider: decides per transaction whether one of its
/// applications must be (re-)synchronized.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider type tag as stored in the `provider.type` column.
    fn kind(&self) -> &'static str;

    /// Seed in-memory membership from storage. Called once at startup.
    async fn init(&self) -> Result<()>;

    /// Consider one top-level transaction (with its inner transactions) of
    /// the block at `round`.
    async fn process(&self, stxn: &SignedTxnInBlock, round: u64) -> Result<()>;

    /// Force a full synchronization of one application.
    async fn sync(&self, app_id: u64, round: u64) -> Result<()>;
}

/// Process-wide membership of known application ids.
///
/// Storage is the source of truth; this set is a cache seeded at startup and
/// grown on mint observation, never persisted on change.
#[derive(Debug, Default)]
pub struct AppIdSet {
    inner: RwLock<HashSet<u64>>,
}

impl AppIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, app_id: u64) -> bool {
        self.inner.read().expect("app id set poisoned").contains(&app_id)
    }

    /// Returns `true` when the id was newly inserted.
    pub fn insert(&self, app_id: u64) -> bool {
        self.inner.write().expect("app id set poisoned").insert(app_id)
    }

    pub fn snapshot(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .inner
            .read()
            .expect("app id set poisoned")
            .iter()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("app id set poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_contains() {
        let set = AppIdSet::new();
        assert!(!set.contains(7));
        assert!(set.insert(7));
        assert!(!set.insert(7));
        assert!(set.contains(7));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let set = AppIdSet::new();
        set.insert(9);
        set.insert(1);
        set.insert(5);
        assert_eq!(set.snapshot(), vec![1, 5, 9]);
    }
}
