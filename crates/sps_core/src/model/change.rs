//! Change log record model.
//!
//! # Responsibility
//! - Describe one applied transition of one proposal.
//!
//! # Invariants
//! - A record is immutable except for `is_unread`, which flips to `false`
//!   once and only through the mark-as-read boundary.
//! - `Removed` records carry the proposal's last known stored values.

use crate::model::proposal::{Proposal, ProposalStatus};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Stable identifier of one change log entry.
pub type ChangeId = Uuid;

/// Classification of one transition, computed fresh per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// First observation of this id.
    Added,
    /// Id existed before and at least one field changed.
    Updated,
    /// Id existed before and is absent from the latest snapshot.
    Removed,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Updated => "updated",
            Self::Removed => "removed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "added" => Some(Self::Added),
            "updated" => Some(Self::Updated),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }

    /// Whether applying this kind writes the proposal row.
    pub fn is_upsert(self) -> bool {
        matches!(self, Self::Added | Self::Updated)
    }
}

/// One append-only change log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalChange {
    pub change_id: ChangeId,
    /// Proposal values after the change (last known values for `Removed`).
    pub proposal: Proposal,
    pub kind: ChangeKind,
    /// Stored status before the change. `None` for `Added`.
    pub previous_status: Option<ProposalStatus>,
    /// Stored version before the change. Meaningful only when
    /// `previous_status` is set.
    #[serde(default)]
    pub previous_version: Option<String>,
    pub is_unread: bool,
    /// Unix epoch milliseconds.
    pub recorded_at_ms: i64,
}

impl ProposalChange {
    pub fn added(proposal: Proposal) -> Self {
        Self::new(proposal, ChangeKind::Added, None)
    }

    pub fn updated(previous: &Proposal, proposal: Proposal) -> Self {
        Self::new(proposal, ChangeKind::Updated, Some(previous))
    }

    pub fn removed(proposal: Proposal) -> Self {
        let previous = proposal.clone();
        Self::new(proposal, ChangeKind::Removed, Some(&previous))
    }

    fn new(proposal: Proposal, kind: ChangeKind, previous: Option<&Proposal>) -> Self {
        Self {
            change_id: Uuid::new_v4(),
            proposal,
            kind,
            previous_status: previous.map(|previous| previous.status),
            previous_version: previous.and_then(|previous| previous.associated_version.clone()),
            is_unread: true,
            recorded_at_ms: now_epoch_ms(),
        }
    }

    /// Whether the proposal's status moved between the previous and new value.
    pub fn status_changed(&self) -> bool {
        match self.previous_status {
            Some(previous) => previous != self.proposal.status,
            None => false,
        }
    }

    /// Whether the associated version moved between the previous and new value.
    pub fn version_changed(&self) -> bool {
        self.previous_status.is_some()
            && self.previous_version != self.proposal.associated_version
    }

    /// `Updated` changes a user cares about: status or target version moved.
    pub fn is_status_relevant(&self) -> bool {
        self.kind == ChangeKind::Updated && (self.status_changed() || self.version_changed())
    }
}

pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
