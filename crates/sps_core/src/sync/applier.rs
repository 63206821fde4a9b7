//! Transactional change applier.
//!
//! # Responsibility
//! - Translate a change batch into store mutations.
//! - Commit the whole batch as one store transaction.
//!
//! # Invariants
//! - Log appends come first, then row upserts/deletes, all in one transaction.
//! - A failure means nothing from the batch was persisted.
//! - The applier holds no state and no lock of its own.

use crate::model::change::ProposalChange;
use crate::repo::proposal_store::{ProposalStore, StoreError, StoreMutation};
use log::{error, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

/// Whole-batch commit failure.
#[derive(Debug)]
pub struct ApplyError {
    pub batch_len: usize,
    pub source: StoreError,
}

impl Display for ApplyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed to apply batch of {} changes: {}",
            self.batch_len, self.source
        )
    }
}

impl Error for ApplyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// Commits change batches to a proposal store.
#[derive(Clone)]
pub struct ChangeApplier {
    store: Arc<dyn ProposalStore>,
}

impl ChangeApplier {
    pub fn new(store: Arc<dyn ProposalStore>) -> Self {
        Self { store }
    }

    /// Applies `batch` atomically.
    ///
    /// An empty batch succeeds without opening a transaction.
    pub fn apply(&self, batch: &[ProposalChange]) -> Result<(), ApplyError> {
        if batch.is_empty() {
            return Ok(());
        }

        let started_at = Instant::now();
        let mutations = mutations_for(batch);
        match self.store.run_transaction(&mutations) {
            Ok(()) => {
                info!(
                    "event=apply_batch module=sync status=ok changes={} mutations={} duration_ms={}",
                    batch.len(),
                    mutations.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(source) => {
                error!(
                    "event=apply_batch module=sync status=error changes={} duration_ms={} error={}",
                    batch.len(),
                    started_at.elapsed().as_millis(),
                    source
                );
                Err(ApplyError {
                    batch_len: batch.len(),
                    source,
                })
            }
        }
    }
}

/// Expands a batch into store mutations: every log append, then every row write.
pub fn mutations_for(batch: &[ProposalChange]) -> Vec<StoreMutation> {
    let mut mutations = Vec::with_capacity(batch.len() * 2);
    mutations.extend(batch.iter().cloned().map(StoreMutation::AppendLog));
    mutations.extend(batch.iter().map(|change| {
        if change.kind.is_upsert() {
            StoreMutation::Upsert(change.proposal.clone())
        } else {
            StoreMutation::Delete(change.proposal.id.clone())
        }
    }));
    mutations
}

#[cfg(test)]
mod tests {
    use super::mutations_for;
    use crate::model::change::ProposalChange;
    use crate::model::proposal::{Proposal, ProposalStatus};
    use crate::repo::proposal_store::StoreMutation;

    #[test]
    fn log_appends_precede_row_writes() {
        let added = ProposalChange::added(Proposal::new("2", "Two", ProposalStatus::Active));
        let removed = ProposalChange::removed(Proposal::new("1", "One", ProposalStatus::Active));

        let mutations = mutations_for(&[added.clone(), removed.clone()]);
        assert_eq!(
            mutations,
            vec![
                StoreMutation::AppendLog(added.clone()),
                StoreMutation::AppendLog(removed),
                StoreMutation::Upsert(added.proposal),
                StoreMutation::Delete("1".to_string()),
            ]
        );
    }
}
