//! Change notifier and notification surface contracts.
//!
//! # Responsibility
//! - Select user-interesting changes from one committed batch.
//! - Deliver them to an external notification surface, coalescing per policy.
//!
//! # Invariants
//! - Only `Added` and status-relevant `Updated` changes are notified.
//! - Delivery failures are logged and never surface as errors.
//! - The notifier never mutates the change log (`is_unread` included).

use crate::config::NotificationPolicy;
use crate::model::change::{ChangeKind, ProposalChange};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Delivery failure reported by a notification surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDeliveryError {
    pub identifier: String,
    pub message: String,
}

impl NotificationDeliveryError {
    pub fn new(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            message: message.into(),
        }
    }
}

impl Display for NotificationDeliveryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed to deliver notification `{}`: {}",
            self.identifier, self.message
        )
    }
}

impl Error for NotificationDeliveryError {}

/// External place notifications are delivered to (OS notification center, log, ...).
pub trait NotificationSurface: Send + Sync {
    fn deliver(
        &self,
        title: &str,
        body: &str,
        identifier: &str,
    ) -> Result<(), NotificationDeliveryError>;
}

/// Surface that writes each notification to the core log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSurface;

impl NotificationSurface for LogNotificationSurface {
    fn deliver(
        &self,
        title: &str,
        body: &str,
        identifier: &str,
    ) -> Result<(), NotificationDeliveryError> {
        info!(
            "event=notification module=notify status=ok identifier={} title={:?} body={:?}",
            identifier, title, body
        );
        Ok(())
    }
}

/// One user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// `<proposal id>:<new status>` for single changes.
    pub identifier: String,
}

/// Outcome of one `notify` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifySummary {
    /// Changes that qualified for a notification.
    pub candidates: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Whether candidates were folded into a single notification.
    pub coalesced: bool,
}

/// Consumer of committed change batches.
pub trait ChangeNotifier: Send + Sync {
    /// Called once per completed cycle with exactly the committed batch.
    fn notify(&self, batch: &[ProposalChange]) -> NotifySummary;
}

/// Default notifier turning proposal changes into surface deliveries.
#[derive(Clone)]
pub struct ProposalStatusNotifier {
    surface: Arc<dyn NotificationSurface>,
    policy: NotificationPolicy,
}

impl ProposalStatusNotifier {
    pub fn new(surface: Arc<dyn NotificationSurface>, policy: NotificationPolicy) -> Self {
        Self { surface, policy }
    }

    fn deliver_all(&self, notifications: &[Notification]) -> (usize, usize) {
        let mut delivered = 0;
        let mut failed = 0;
        for notification in notifications {
            match self.surface.deliver(
                notification.title.as_str(),
                notification.body.as_str(),
                notification.identifier.as_str(),
            ) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    failed += 1;
                    warn!(
                        "event=notification module=notify status=error identifier={} error={}",
                        notification.identifier, err
                    );
                }
            }
        }
        (delivered, failed)
    }
}

impl ChangeNotifier for ProposalStatusNotifier {
    fn notify(&self, batch: &[ProposalChange]) -> NotifySummary {
        let candidates = notifications_for(batch);
        if candidates.is_empty() {
            return NotifySummary::default();
        }

        let coalesced = self.policy.should_coalesce(candidates.len());
        let outgoing = if coalesced {
            vec![coalesced_notification(batch, candidates.len())]
        } else {
            candidates.clone()
        };

        let (delivered, failed) = self.deliver_all(&outgoing);
        info!(
            "event=notify_batch module=notify status=ok candidates={} delivered={} failed={} coalesced={}",
            candidates.len(),
            delivered,
            failed,
            coalesced
        );

        NotifySummary {
            candidates: candidates.len(),
            delivered,
            failed,
            coalesced,
        }
    }
}

/// Builds one notification per notify-worthy change, in batch order.
pub fn notifications_for(batch: &[ProposalChange]) -> Vec<Notification> {
    batch.iter().filter_map(notification_for).collect()
}

fn notification_for(change: &ProposalChange) -> Option<Notification> {
    if change.kind != ChangeKind::Added && !change.is_status_relevant() {
        return None;
    }
    let proposal = &change.proposal;
    let version = proposal
        .associated_version
        .as_deref()
        .map(|version| format!(" ({version})"))
        .unwrap_or_default();
    let identifier = format!("{}:{}", proposal.id, proposal.status.as_str());

    let body = match change.kind {
        ChangeKind::Added => format!("{}: {}{}", proposal.name, proposal.status, version),
        _ if change.status_changed() => format!(
            "{} moved from {} to {}{}",
            proposal.name,
            change.previous_status?,
            proposal.status,
            version
        ),
        _ => match &proposal.associated_version {
            Some(target) => format!("{} is now targeted at {}", proposal.name, target),
            None => format!("{} no longer targets a version", proposal.name),
        },
    };

    let title = match change.kind {
        ChangeKind::Added => format!("New proposal {}", proposal.id),
        _ => format!("{} {}", proposal.id, proposal.status),
    };

    Some(Notification {
        title,
        body,
        identifier,
    })
}

fn coalesced_notification(batch: &[ProposalChange], count: usize) -> Notification {
    let anchor = batch
        .first()
        .map(|change| change.change_id.to_string())
        .unwrap_or_default();
    Notification {
        title: "Proposal updates".to_string(),
        body: format!("{count} proposal changes"),
        identifier: format!("batch:{anchor}"),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        notifications_for, ChangeNotifier, NotificationDeliveryError, NotificationSurface,
        ProposalStatusNotifier,
    };
    use crate::config::NotificationPolicy;
    use crate::model::change::ProposalChange;
    use crate::model::proposal::{Proposal, ProposalStatus};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSurface {
        delivered: Mutex<Vec<String>>,
        reject: bool,
    }

    impl NotificationSurface for RecordingSurface {
        fn deliver(
            &self,
            _title: &str,
            body: &str,
            identifier: &str,
        ) -> Result<(), NotificationDeliveryError> {
            if self.reject {
                return Err(NotificationDeliveryError::new(identifier, "denied"));
            }
            self.delivered.lock().unwrap().push(body.to_string());
            Ok(())
        }
    }

    fn proposal(id: &str, status: ProposalStatus) -> Proposal {
        Proposal::new(id, format!("Proposal {id}"), status)
    }

    #[test]
    fn removals_and_cosmetic_updates_are_skipped() {
        let before = proposal("SE-0002", ProposalStatus::Active);
        let mut renamed = before.clone();
        renamed.name = "Renamed".to_string();
        let batch = vec![
            ProposalChange::removed(proposal("SE-0001", ProposalStatus::Rejected)),
            ProposalChange::updated(&before, renamed),
        ];
        assert!(notifications_for(&batch).is_empty());
    }

    #[test]
    fn status_moves_are_described() {
        let before = proposal("SE-0003", ProposalStatus::Active);
        let after = proposal("SE-0003", ProposalStatus::Accepted).with_version("Swift 6");
        let notes = notifications_for(&[ProposalChange::updated(&before, after)]);

        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].identifier, "SE-0003:accepted");
        assert!(notes[0].body.contains("(Swift 6)"));
    }

    #[test]
    fn version_only_update_is_notified() {
        let before = proposal("SE-0004", ProposalStatus::Implemented);
        let after = before.clone().with_version("Swift 5.9");
        let notes = notifications_for(&[ProposalChange::updated(&before, after)]);
        assert_eq!(notes.len(), 1);
        assert!(notes[0].body.contains("Swift 5.9"));
    }

    #[test]
    fn notified_updates_are_exactly_the_status_relevant_ones() {
        let before = proposal("SE-0005", ProposalStatus::Active).with_version("Swift 5.9");
        let mut summary_only = before.clone();
        summary_only.summary = Some("Reworded".to_string());
        let mut dropped_version = before.clone();
        dropped_version.associated_version = None;
        let updates = vec![
            ProposalChange::updated(&before, summary_only),
            ProposalChange::updated(&before, dropped_version),
            ProposalChange::updated(&before, proposal("SE-0005", ProposalStatus::Rejected)),
        ];

        let notified = notifications_for(&updates)
            .into_iter()
            .map(|note| note.body)
            .collect::<Vec<_>>();
        let relevant = updates
            .iter()
            .filter(|change| change.is_status_relevant())
            .count();

        assert_eq!(notified.len(), relevant);
        assert_eq!(
            notified,
            vec![
                "Proposal SE-0005 no longer targets a version".to_string(),
                "Proposal SE-0005 moved from Active review to Rejected".to_string(),
            ]
        );
    }

    #[test]
    fn large_batches_are_coalesced() {
        let surface = Arc::new(RecordingSurface::default());
        let notifier = ProposalStatusNotifier::new(
            surface.clone(),
            NotificationPolicy {
                coalesce_above: Some(1),
            },
        );
        let batch = vec![
            ProposalChange::added(proposal("SE-0010", ProposalStatus::AwaitingReview)),
            ProposalChange::added(proposal("SE-0011", ProposalStatus::AwaitingReview)),
        ];

        let summary = notifier.notify(&batch);
        assert!(summary.coalesced);
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.delivered, 1);
        assert_eq!(*surface.delivered.lock().unwrap(), vec!["2 proposal changes"]);
    }

    #[test]
    fn delivery_failures_are_counted_not_raised() {
        let surface = Arc::new(RecordingSurface {
            reject: true,
            ..RecordingSurface::default()
        });
        let notifier = ProposalStatusNotifier::new(surface, NotificationPolicy::individual());
        let summary = notifier.notify(&[ProposalChange::added(proposal(
            "SE-0012",
            ProposalStatus::Active,
        ))]);
        assert_eq!(summary.delivered, 0);
        assert_eq!(summary.failed, 1);
    }
}
