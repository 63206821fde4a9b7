//! Observable unread-change count.

use crate::repo::proposal_store::{ProposalStore, StoreResult};
use std::sync::Arc;
use tokio::sync::watch;

/// Shared, cloneable publisher of the change log's unread count.
///
/// The synchronizer refreshes it after each commit; the read/unread boundary
/// refreshes it after marking entries read.
#[derive(Debug, Clone)]
pub struct UnreadBadge {
    count: Arc<watch::Sender<u64>>,
}

impl Default for UnreadBadge {
    fn default() -> Self {
        Self::new(0)
    }
}

impl UnreadBadge {
    pub fn new(initial: u64) -> Self {
        Self {
            count: Arc::new(watch::Sender::new(initial)),
        }
    }

    /// Seeds the badge from the store's current unread count.
    pub fn from_store(store: &dyn ProposalStore) -> StoreResult<Self> {
        Ok(Self::new(store.count_unread()?))
    }

    pub fn current(&self) -> u64 {
        *self.count.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.count.subscribe()
    }

    /// Re-reads the unread count and notifies subscribers when it changed.
    pub fn refresh(&self, store: &dyn ProposalStore) -> StoreResult<u64> {
        let unread = store.count_unread()?;
        self.count.send_if_modified(|current| {
            let changed = *current != unread;
            *current = unread;
            changed
        });
        Ok(unread)
    }
}
