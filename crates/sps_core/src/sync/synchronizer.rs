//! Sync cycle orchestration.
//!
//! # Responsibility
//! - Run one fetch → diff → apply → notify pass against the proposal store.
//! - Publish cycle phases, activity and the unread badge.
//!
//! # Invariants
//! - Steps run strictly in order; notify only sees its own cycle's batch.
//! - Fetch and apply failures end the cycle `Failed` with the store unchanged.
//! - Notification problems never fail a cycle.
//! - Only the fetch step is cancellable; an apply in progress runs to its end.
//! - Concurrent `synchronize` calls are not deduplicated here.

use crate::config::SyncConfig;
use crate::model::change::{ChangeKind, ProposalChange};
use crate::model::proposal::Proposal;
use crate::repo::proposal_store::{ProposalStore, StoreError};
use crate::sync::applier::{ApplyError, ChangeApplier};
use crate::sync::badge::UnreadBadge;
use crate::sync::cycle::{CycleGuard, SyncCycle, SyncPhase};
use crate::sync::differ::{diff, DiffError};
use crate::sync::notifier::{ChangeNotifier, NotificationSurface, NotifySummary, ProposalStatusNotifier};
use crate::sync::remote::{FetchError, RemoteStatusSource};
use async_trait::async_trait;
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub type SyncResult<T> = Result<T, SyncError>;

/// Reasons a cycle ends `Failed`.
#[derive(Debug)]
pub enum SyncError {
    Fetch(FetchError),
    /// The fetched snapshot was malformed (duplicate or invalid records).
    MalformedSnapshot(DiffError),
    /// Reading current store contents failed.
    Store(StoreError),
    /// Committing the batch failed; nothing was written.
    Apply(ApplyError),
    /// The given `SyncCycle` was already used.
    CycleAlreadyStarted(Uuid),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(err) => write!(f, "{err}"),
            Self::MalformedSnapshot(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Apply(err) => write!(f, "{err}"),
            Self::CycleAlreadyStarted(id) => write!(f, "sync cycle {id} was already started"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fetch(err) => Some(err),
            Self::MalformedSnapshot(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Apply(err) => Some(err),
            Self::CycleAlreadyStarted(_) => None,
        }
    }
}

impl SyncError {
    /// Stable short code for log lines and boundary reporting.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Fetch(FetchError::Cancelled) => "fetch_cancelled",
            Self::Fetch(FetchError::TimedOut(_)) => "fetch_timed_out",
            Self::Fetch(_) => "fetch_failed",
            Self::MalformedSnapshot(_) => "malformed_snapshot",
            Self::Store(_) => "store_read_failed",
            Self::Apply(_) => "store_transaction_failed",
            Self::CycleAlreadyStarted(_) => "cycle_already_started",
        }
    }
}

/// Result of a successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub cycle_id: Uuid,
    /// The batch committed by this cycle, in diff order.
    pub changes: Vec<ProposalChange>,
    pub notifications: NotifySummary,
    /// Unread count after commit, when it could be read.
    pub unread_count: Option<u64>,
}

impl SyncReport {
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes
            .iter()
            .filter(|change| change.kind == kind)
            .count()
    }
}

/// Something that can run sync cycles.
#[async_trait]
pub trait Synchronize: Send + Sync {
    /// Runs one cycle, publishing its progress on `cycle`.
    async fn synchronize(&self, cycle: &SyncCycle) -> SyncResult<SyncReport>;

    /// Runs one cycle on a fresh `SyncCycle`.
    async fn run_once(&self) -> SyncResult<SyncReport> {
        let cycle = SyncCycle::new();
        self.synchronize(&cycle).await
    }
}

/// Default synchronizer over a remote source, a store and a notifier.
pub struct Synchronizer {
    source: Arc<dyn RemoteStatusSource>,
    store: Arc<dyn ProposalStore>,
    applier: ChangeApplier,
    notifier: Arc<dyn ChangeNotifier>,
    badge: UnreadBadge,
    fetch_timeout: Duration,
}

impl Synchronizer {
    pub fn new(
        source: Arc<dyn RemoteStatusSource>,
        store: Arc<dyn ProposalStore>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Self {
        Self {
            source,
            applier: ChangeApplier::new(Arc::clone(&store)),
            store,
            notifier,
            badge: UnreadBadge::default(),
            fetch_timeout: Duration::from_secs(crate::config::DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }

    /// Builds a synchronizer with the default notifier and config tunables.
    ///
    /// The badge is seeded from the store's current unread count.
    pub fn from_config(
        source: Arc<dyn RemoteStatusSource>,
        store: Arc<dyn ProposalStore>,
        surface: Arc<dyn NotificationSurface>,
        config: &SyncConfig,
    ) -> Result<Self, StoreError> {
        let badge = UnreadBadge::from_store(store.as_ref())?;
        let notifier = Arc::new(ProposalStatusNotifier::new(surface, config.notification));
        Ok(Self::new(source, store, notifier)
            .with_fetch_timeout(config.fetch_timeout())
            .with_badge(badge))
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Shares an existing badge (for example one also held by the UI boundary).
    pub fn with_badge(mut self, badge: UnreadBadge) -> Self {
        self.badge = badge;
        self
    }

    pub fn unread_badge(&self) -> UnreadBadge {
        self.badge.clone()
    }

    pub fn store(&self) -> Arc<dyn ProposalStore> {
        Arc::clone(&self.store)
    }

    async fn fetch(&self, guard: &CycleGuard<'_>) -> Result<Vec<Proposal>, FetchError> {
        let cancel = guard.cancellation_token();
        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            fetched = tokio::time::timeout(self.fetch_timeout, self.source.fetch_snapshot()) => {
                fetched.unwrap_or(Err(FetchError::TimedOut(self.fetch_timeout)))
            }
        }
    }

    fn fail(&self, guard: CycleGuard<'_>, cycle: &SyncCycle, started_at: Instant, err: SyncError) -> SyncError {
        error!(
            "event=sync_cycle module=sync status=error cycle_id={} duration_ms={} error_code={} error={}",
            cycle.id(),
            started_at.elapsed().as_millis(),
            err.code(),
            err
        );
        guard.enter(SyncPhase::Failed(err.to_string()));
        err
    }
}

#[async_trait]
impl Synchronize for Synchronizer {
    async fn synchronize(&self, cycle: &SyncCycle) -> SyncResult<SyncReport> {
        let guard = cycle
            .begin()
            .ok_or(SyncError::CycleAlreadyStarted(cycle.id()))?;
        let started_at = Instant::now();
        info!(
            "event=sync_cycle module=sync status=start cycle_id={}",
            cycle.id()
        );

        let fetched = self.fetch(&guard).await;
        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(err) => return Err(self.fail(guard, cycle, started_at, SyncError::Fetch(err))),
        };

        guard.enter(SyncPhase::Diffing);
        let current = match self.store.query_all() {
            Ok(current) => current,
            Err(err) => return Err(self.fail(guard, cycle, started_at, SyncError::Store(err))),
        };
        let batch = match diff(&current, &snapshot) {
            Ok(batch) => batch,
            Err(err) => {
                return Err(self.fail(guard, cycle, started_at, SyncError::MalformedSnapshot(err)))
            }
        };

        guard.enter(SyncPhase::Applying);
        if let Err(err) = self.applier.apply(&batch) {
            return Err(self.fail(guard, cycle, started_at, SyncError::Apply(err)));
        }

        let unread_count = match self.badge.refresh(self.store.as_ref()) {
            Ok(unread) => Some(unread),
            Err(err) => {
                warn!(
                    "event=unread_refresh module=sync status=error cycle_id={} error={}",
                    cycle.id(),
                    err
                );
                None
            }
        };

        guard.enter(SyncPhase::Notifying);
        let notifications = if batch.is_empty() {
            NotifySummary::default()
        } else {
            self.notifier.notify(&batch)
        };

        guard.enter(SyncPhase::Done {
            changes: batch.len(),
        });
        info!(
            "event=sync_cycle module=sync status=ok cycle_id={} duration_ms={} fetched={} changes={} notified={}",
            cycle.id(),
            started_at.elapsed().as_millis(),
            snapshot.len(),
            batch.len(),
            notifications.delivered
        );

        Ok(SyncReport {
            cycle_id: cycle.id(),
            changes: batch,
            notifications,
            unread_count,
        })
    }
}
