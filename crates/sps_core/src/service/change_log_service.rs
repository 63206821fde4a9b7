//! Change log use-case service.
//!
//! # Responsibility
//! - Serve the proposal list and change log to presentation layers.
//! - Own the read/unread boundary and keep the unread badge current.
//!
//! # Invariants
//! - Unread entries are only cleared through `mark_read` / `mark_all_read`.
//! - Every successful mark operation refreshes the badge before returning.

use crate::model::change::{ChangeId, ProposalChange};
use crate::model::proposal::Proposal;
use crate::repo::proposal_store::{ProposalStore, StoreResult};
use crate::sync::badge::UnreadBadge;
use log::info;
use std::sync::Arc;
use tokio::sync::watch;

pub struct ChangeLogService {
    store: Arc<dyn ProposalStore>,
    badge: UnreadBadge,
}

impl ChangeLogService {
    /// Creates a service sharing `badge` with the synchronizer.
    pub fn new(store: Arc<dyn ProposalStore>, badge: UnreadBadge) -> Self {
        Self { store, badge }
    }

    /// Proposals sorted by status display order, then id.
    pub fn list_proposals(&self) -> StoreResult<Vec<Proposal>> {
        let mut proposals = self.store.query_all()?;
        proposals.sort_by(|left, right| {
            left.status
                .display_order()
                .cmp(&right.status.display_order())
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(proposals)
    }

    /// Unread entries, oldest first.
    pub fn list_unread(&self) -> StoreResult<Vec<ProposalChange>> {
        self.store.query_unread_log()
    }

    /// Newest-first log page; `None` returns the whole log.
    pub fn list_log(&self, limit: Option<u32>) -> StoreResult<Vec<ProposalChange>> {
        self.store.query_log(limit)
    }

    pub fn unread_count(&self) -> u64 {
        self.badge.current()
    }

    pub fn subscribe_unread(&self) -> watch::Receiver<u64> {
        self.badge.subscribe()
    }

    pub fn mark_read(&self, change_ids: &[ChangeId]) -> StoreResult<usize> {
        let updated = self.store.mark_read(change_ids)?;
        let unread = self.badge.refresh(self.store.as_ref())?;
        info!(
            "event=mark_read module=service status=ok requested={} updated={} unread={}",
            change_ids.len(),
            updated,
            unread
        );
        Ok(updated)
    }

    pub fn mark_all_read(&self) -> StoreResult<usize> {
        let updated = self.store.mark_all_read()?;
        let unread = self.badge.refresh(self.store.as_ref())?;
        info!(
            "event=mark_read module=service status=ok scope=all updated={} unread={}",
            updated, unread
        );
        Ok(updated)
    }

    /// Re-reads the unread count, e.g. after another process wrote the store.
    pub fn refresh(&self) -> StoreResult<u64> {
        self.badge.refresh(self.store.as_ref())
    }
}
