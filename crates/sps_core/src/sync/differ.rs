//! Snapshot differ.
//!
//! # Responsibility
//! - Compute the minimal change batch turning stored proposals into a
//!   freshly fetched snapshot.
//!
//! # Invariants
//! - Pure: no I/O, no retained state.
//! - Output order: `Added`/`Updated` in `incoming` order, then `Removed`
//!   in `current` order.
//! - An id whose record compares equal in both inputs yields no change.

use crate::model::change::ProposalChange;
use crate::model::proposal::{Proposal, ProposalId, ProposalValidationError};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Malformed snapshot input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    /// The same id appears more than once in the incoming snapshot.
    DuplicateId(ProposalId),
    /// An incoming record violates proposal invariants.
    InvalidProposal(ProposalValidationError),
}

impl Display for DiffError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateId(id) => write!(f, "snapshot contains proposal `{id}` more than once"),
            Self::InvalidProposal(err) => write!(f, "snapshot contains invalid proposal: {err}"),
        }
    }
}

impl Error for DiffError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidProposal(err) => Some(err),
            Self::DuplicateId(_) => None,
        }
    }
}

impl From<ProposalValidationError> for DiffError {
    fn from(value: ProposalValidationError) -> Self {
        Self::InvalidProposal(value)
    }
}

/// Computes the change batch from `current` (stored) to `incoming` (fetched).
///
/// Returns an empty batch when both inputs hold the same records.
///
/// # Errors
/// - `DuplicateId` when `incoming` repeats an id.
/// - `InvalidProposal` when an incoming record fails validation.
pub fn diff(current: &[Proposal], incoming: &[Proposal]) -> Result<Vec<ProposalChange>, DiffError> {
    let stored: HashMap<&str, &Proposal> = current
        .iter()
        .map(|proposal| (proposal.id.as_str(), proposal))
        .collect();

    let mut seen: HashSet<&str> = HashSet::with_capacity(incoming.len());
    let mut batch = Vec::new();

    for proposal in incoming {
        proposal.validate()?;
        if !seen.insert(proposal.id.as_str()) {
            return Err(DiffError::DuplicateId(proposal.id.clone()));
        }

        match stored.get(proposal.id.as_str()) {
            None => batch.push(ProposalChange::added(proposal.clone())),
            Some(previous) if *previous != proposal => {
                batch.push(ProposalChange::updated(previous, proposal.clone()));
            }
            Some(_) => {}
        }
    }

    for proposal in current {
        if !seen.contains(proposal.id.as_str()) {
            batch.push(ProposalChange::removed(proposal.clone()));
        }
    }

    Ok(batch)
}
