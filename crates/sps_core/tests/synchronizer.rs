use async_trait::async_trait;
use sps_core::db::open_db_in_memory;
use sps_core::{
    diff, ChangeApplier, ChangeKind, ChangeLogService, FetchError, NotificationDeliveryError,
    NotificationPolicy, NotificationSurface, Proposal, ProposalStatus, ProposalStore,
    RemoteStatusSource, SqliteProposalStore, SyncConfig, SyncCycle, SyncError, SyncPhase,
    Synchronize, Synchronizer,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Returns whatever snapshot was last installed, or a transport error.
#[derive(Default)]
struct ScriptedSource {
    snapshot: Mutex<Option<Vec<Proposal>>>,
}

impl ScriptedSource {
    fn serving(proposals: Vec<Proposal>) -> Arc<Self> {
        let source = Arc::new(Self::default());
        source.set(proposals);
        source
    }

    fn set(&self, proposals: Vec<Proposal>) {
        *self.snapshot.lock().unwrap() = Some(proposals);
    }

    fn fail(&self) {
        *self.snapshot.lock().unwrap() = None;
    }
}

#[async_trait]
impl RemoteStatusSource for ScriptedSource {
    async fn fetch_snapshot(&self) -> Result<Vec<Proposal>, FetchError> {
        self.snapshot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| FetchError::Transport("connection reset".to_string()))
    }
}

struct HangingSource;

#[async_trait]
impl RemoteStatusSource for HangingSource {
    async fn fetch_snapshot(&self) -> Result<Vec<Proposal>, FetchError> {
        std::future::pending().await
    }
}

#[derive(Default)]
struct RecordingSurface {
    identifiers: Mutex<Vec<String>>,
    reject: bool,
}

impl NotificationSurface for RecordingSurface {
    fn deliver(
        &self,
        _title: &str,
        _body: &str,
        identifier: &str,
    ) -> Result<(), NotificationDeliveryError> {
        if self.reject {
            return Err(NotificationDeliveryError::new(identifier, "not authorized"));
        }
        self.identifiers.lock().unwrap().push(identifier.to_string());
        Ok(())
    }
}

struct Fixture {
    store: Arc<SqliteProposalStore>,
    surface: Arc<RecordingSurface>,
}

impl Fixture {
    fn with_stored(proposals: &[Proposal]) -> Self {
        Self::build(proposals, RecordingSurface::default())
    }

    fn build(proposals: &[Proposal], surface: RecordingSurface) -> Self {
        let store = Arc::new(SqliteProposalStore::try_new(open_db_in_memory().unwrap()).unwrap());
        let seed = diff(&[], proposals).unwrap();
        ChangeApplier::new(store.clone()).apply(&seed).unwrap();
        store.mark_all_read().unwrap();
        Self {
            store,
            surface: Arc::new(surface),
        }
    }

    fn synchronizer(&self, source: Arc<dyn RemoteStatusSource>) -> Synchronizer {
        let config = SyncConfig {
            notification: NotificationPolicy::individual(),
            ..SyncConfig::default()
        };
        Synchronizer::from_config(source, self.store.clone(), self.surface.clone(), &config)
            .unwrap()
    }

    fn delivered(&self) -> Vec<String> {
        self.surface.identifiers.lock().unwrap().clone()
    }
}

fn active(id: &str) -> Proposal {
    Proposal::new(id, format!("Proposal {id}"), ProposalStatus::Active)
}

#[tokio::test]
async fn new_remote_proposal_is_added_and_counted_unread() {
    let fixture = Fixture::with_stored(&[active("1")]);
    let synchronizer = fixture.synchronizer(ScriptedSource::serving(vec![active("1"), active("2")]));
    let badge = synchronizer.unread_badge();
    assert_eq!(badge.current(), 0);

    let cycle = SyncCycle::new();
    let mut activity = cycle.subscribe_activity();
    let report = synchronizer.synchronize(&cycle).await.unwrap();

    assert_eq!(report.count(ChangeKind::Added), 1);
    assert_eq!(report.changes[0].proposal.id, "2");
    assert_eq!(fixture.store.query_all().unwrap(), vec![active("1"), active("2")]);
    assert_eq!(report.unread_count, Some(1));
    assert_eq!(badge.current(), 1);
    assert_eq!(fixture.delivered(), vec!["2:active".to_string()]);

    assert_eq!(cycle.phase(), SyncPhase::Done { changes: 1 });
    assert!(activity.has_changed().unwrap());
    assert!(!*activity.borrow_and_update());
}

#[tokio::test]
async fn status_change_and_removal_in_one_cycle() {
    let fixture = Fixture::with_stored(&[active("1"), active("2")]);
    let implemented = Proposal::new("1", "Proposal 1", ProposalStatus::Implemented);
    let synchronizer = fixture.synchronizer(ScriptedSource::serving(vec![implemented.clone()]));

    let report = synchronizer.run_once().await.unwrap();

    let kinds = report
        .changes
        .iter()
        .map(|change| (change.kind, change.proposal.id.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(kinds, vec![(ChangeKind::Updated, "1"), (ChangeKind::Removed, "2")]);
    assert_eq!(fixture.store.query_all().unwrap(), vec![implemented]);
    assert_eq!(fixture.store.count_unread().unwrap(), 2);
    // Removal is logged but not notified.
    assert_eq!(fixture.delivered(), vec!["1:implemented".to_string()]);
}

#[tokio::test]
async fn fetch_failure_leaves_store_and_log_untouched() {
    let fixture = Fixture::with_stored(&[active("1")]);
    let source = ScriptedSource::serving(vec![]);
    source.fail();
    let synchronizer = fixture.synchronizer(source);
    let log_before = fixture.store.query_log(None).unwrap();

    let cycle = SyncCycle::new();
    let err = synchronizer.synchronize(&cycle).await.unwrap_err();

    assert!(matches!(err, SyncError::Fetch(FetchError::Transport(_))));
    assert!(matches!(cycle.phase(), SyncPhase::Failed(_)));
    assert!(!cycle.is_active());
    assert_eq!(fixture.store.query_all().unwrap(), vec![active("1")]);
    assert_eq!(fixture.store.query_log(None).unwrap(), log_before);
    assert!(fixture.delivered().is_empty());
}

#[tokio::test]
async fn retry_after_failure_converges() {
    let fixture = Fixture::with_stored(&[active("1")]);
    let source = ScriptedSource::serving(vec![]);
    source.fail();
    let synchronizer = fixture.synchronizer(source.clone());
    assert!(synchronizer.run_once().await.is_err());

    source.set(vec![active("3")]);
    let report = synchronizer.run_once().await.unwrap();
    assert_eq!(report.changes.len(), 2);
    assert_eq!(fixture.store.query_all().unwrap(), vec![active("3")]);
}

#[tokio::test]
async fn malformed_snapshot_fails_without_writing() {
    let fixture = Fixture::with_stored(&[]);
    let synchronizer = fixture.synchronizer(ScriptedSource::serving(vec![active("1"), active("1")]));

    let err = synchronizer.run_once().await.unwrap_err();

    assert!(matches!(err, SyncError::MalformedSnapshot(_)));
    assert_eq!(err.code(), "malformed_snapshot");
    assert!(fixture.store.query_all().unwrap().is_empty());
    assert!(fixture.store.query_log(None).unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_fetch_ends_cycle_failed() {
    let fixture = Fixture::with_stored(&[active("1")]);
    let synchronizer = fixture.synchronizer(Arc::new(HangingSource));

    let cycle = SyncCycle::new();
    cycle.cancel();
    let err = synchronizer.synchronize(&cycle).await.unwrap_err();

    assert!(matches!(err, SyncError::Fetch(FetchError::Cancelled)));
    assert!(matches!(cycle.phase(), SyncPhase::Failed(_)));
    assert_eq!(fixture.store.query_all().unwrap(), vec![active("1")]);
}

#[tokio::test]
async fn slow_fetch_times_out() {
    let fixture = Fixture::with_stored(&[]);
    let synchronizer = fixture
        .synchronizer(Arc::new(HangingSource))
        .with_fetch_timeout(Duration::from_millis(20));

    let err = synchronizer.run_once().await.unwrap_err();
    assert!(matches!(err, SyncError::Fetch(FetchError::TimedOut(_))));
    assert_eq!(err.code(), "fetch_timed_out");
}

#[tokio::test]
async fn notification_failures_do_not_fail_the_cycle() {
    let fixture = Fixture::build(
        &[],
        RecordingSurface {
            reject: true,
            ..RecordingSurface::default()
        },
    );
    let synchronizer = fixture.synchronizer(ScriptedSource::serving(vec![active("1")]));

    let report = synchronizer.run_once().await.unwrap();

    assert_eq!(report.notifications.failed, 1);
    assert_eq!(report.notifications.delivered, 0);
    assert_eq!(fixture.store.query_all().unwrap(), vec![active("1")]);
}

#[tokio::test]
async fn repeated_sync_of_same_snapshot_is_quiet() {
    let fixture = Fixture::with_stored(&[]);
    let synchronizer = fixture.synchronizer(ScriptedSource::serving(vec![active("1")]));

    assert!(synchronizer.run_once().await.unwrap().has_changes());
    let second = synchronizer.run_once().await.unwrap();

    assert!(!second.has_changes());
    assert_eq!(second.notifications.candidates, 0);
    assert_eq!(fixture.store.query_log(None).unwrap().len(), 1);
    assert_eq!(fixture.delivered().len(), 1);
}

#[tokio::test]
async fn cycle_cannot_be_reused() {
    let fixture = Fixture::with_stored(&[]);
    let synchronizer = fixture.synchronizer(ScriptedSource::serving(vec![]));

    let cycle = SyncCycle::new();
    synchronizer.synchronize(&cycle).await.unwrap();
    let err = synchronizer.synchronize(&cycle).await.unwrap_err();

    assert!(matches!(err, SyncError::CycleAlreadyStarted(id) if id == cycle.id()));
    assert_eq!(cycle.phase(), SyncPhase::Done { changes: 0 });
}

#[tokio::test]
async fn marking_read_updates_the_shared_badge() {
    let fixture = Fixture::with_stored(&[]);
    let synchronizer = fixture.synchronizer(ScriptedSource::serving(vec![active("1"), active("2")]));
    let service = ChangeLogService::new(fixture.store.clone(), synchronizer.unread_badge());
    let mut unread = service.subscribe_unread();

    synchronizer.run_once().await.unwrap();
    assert!(unread.has_changed().unwrap());
    assert_eq!(*unread.borrow_and_update(), 2);

    let first = service.list_unread().unwrap()[0].change_id;
    assert_eq!(service.mark_read(&[first]).unwrap(), 1);
    assert_eq!(*unread.borrow_and_update(), 1);

    assert_eq!(service.mark_all_read().unwrap(), 1);
    assert_eq!(service.unread_count(), 0);
    assert!(service.list_unread().unwrap().is_empty());
    assert_eq!(service.list_log(None).unwrap().len(), 2);
}

#[tokio::test]
async fn proposals_are_listed_in_status_display_order() {
    let fixture = Fixture::with_stored(&[
        Proposal::new("1", "One", ProposalStatus::Rejected),
        Proposal::new("2", "Two", ProposalStatus::Active),
        Proposal::new("3", "Three", ProposalStatus::Implemented),
    ]);
    let service = ChangeLogService::new(
        fixture.store.clone(),
        sps_core::UnreadBadge::from_store(&*fixture.store).unwrap(),
    );

    let ids = service
        .list_proposals()
        .unwrap()
        .into_iter()
        .map(|proposal| proposal.id)
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["2", "3", "1"]);
}
