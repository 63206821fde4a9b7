//! Proposal domain model.
//!
//! # Responsibility
//! - Define the canonical proposal record mirrored from the remote source.
//! - Provide status metadata (display order, display name, wire names).
//!
//! # Invariants
//! - `id` is stable and is the only identity; every other field is mutable.
//! - Two proposals are "unchanged" only when every field compares equal.
//! - `id` and `name` are never blank after validation.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Stable proposal identifier (for example `SE-0001`).
pub type ProposalId = String;

/// Review lifecycle status of one proposal.
///
/// Variant order has no meaning; use [`ProposalStatus::display_order`] for
/// presentation ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    AwaitingReview,
    ScheduledForReview,
    /// Currently in active review.
    Active,
    ReturnedForRevision,
    Deferred,
    Accepted,
    AcceptedWithRevisions,
    Implemented,
    Rejected,
    Withdrawn,
}

impl ProposalStatus {
    /// All statuses, sorted by display order.
    pub const ALL: [ProposalStatus; 10] = [
        Self::Active,
        Self::ScheduledForReview,
        Self::AwaitingReview,
        Self::ReturnedForRevision,
        Self::Accepted,
        Self::AcceptedWithRevisions,
        Self::Implemented,
        Self::Deferred,
        Self::Rejected,
        Self::Withdrawn,
    ];

    /// Fixed presentation order; lower sorts first.
    pub fn display_order(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::ScheduledForReview => 1,
            Self::AwaitingReview => 2,
            Self::ReturnedForRevision => 3,
            Self::Accepted => 4,
            Self::AcceptedWithRevisions => 5,
            Self::Implemented => 6,
            Self::Deferred => 7,
            Self::Rejected => 8,
            Self::Withdrawn => 9,
        }
    }

    /// Human-readable label used in notification text.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::AwaitingReview => "Awaiting review",
            Self::ScheduledForReview => "Scheduled for review",
            Self::Active => "Active review",
            Self::ReturnedForRevision => "Returned for revision",
            Self::Deferred => "Deferred",
            Self::Accepted => "Accepted",
            Self::AcceptedWithRevisions => "Accepted with revisions",
            Self::Implemented => "Implemented",
            Self::Rejected => "Rejected",
            Self::Withdrawn => "Withdrawn",
        }
    }

    /// Storage/wire name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingReview => "awaiting_review",
            Self::ScheduledForReview => "scheduled_for_review",
            Self::Active => "active",
            Self::ReturnedForRevision => "returned_for_revision",
            Self::Deferred => "deferred",
            Self::Accepted => "accepted",
            Self::AcceptedWithRevisions => "accepted_with_revisions",
            Self::Implemented => "implemented",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }

    /// Parses the storage/wire name produced by [`ProposalStatus::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }
}

impl Display for ProposalStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Validation failures for proposal records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalValidationError {
    BlankId,
    BlankName(ProposalId),
}

impl Display for ProposalValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankId => write!(f, "proposal id must not be blank"),
            Self::BlankName(id) => write!(f, "proposal `{id}` has a blank name"),
        }
    }
}

impl Error for ProposalValidationError {}

/// Canonical proposal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Stable identity, never reused for another proposal.
    pub id: ProposalId,
    pub name: String,
    pub status: ProposalStatus,
    /// Language version the status applies to, when the source provides one.
    #[serde(default)]
    pub associated_version: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub link: Option<String>,
}

impl Proposal {
    /// Creates a proposal with only identity, name and status set.
    pub fn new(id: impl Into<ProposalId>, name: impl Into<String>, status: ProposalStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status,
            associated_version: None,
            summary: None,
            authors: Vec::new(),
            link: None,
        }
    }

    /// Returns a copy with `associated_version` set.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.associated_version = Some(version.into());
        self
    }

    /// Checks record-level invariants.
    ///
    /// # Errors
    /// - `BlankId` when `id` is empty after trim.
    /// - `BlankName` when `name` is empty after trim.
    pub fn validate(&self) -> Result<(), ProposalValidationError> {
        if self.id.trim().is_empty() {
            return Err(ProposalValidationError::BlankId);
        }
        if self.name.trim().is_empty() {
            return Err(ProposalValidationError::BlankName(self.id.clone()));
        }
        Ok(())
    }
}
