use sps_core::db::open_db_in_memory;
use sps_core::{
    diff, ChangeApplier, ChangeKind, Proposal, ProposalChange, ProposalStatus, ProposalStore,
    SqliteProposalStore, StoreError, StoreMutation,
};
use std::sync::Arc;

fn new_store() -> Arc<SqliteProposalStore> {
    Arc::new(SqliteProposalStore::try_new(open_db_in_memory().unwrap()).unwrap())
}

fn proposal(id: &str, status: ProposalStatus) -> Proposal {
    Proposal::new(id, format!("Proposal {id}"), status)
}

fn seed(store: &Arc<SqliteProposalStore>, proposals: &[Proposal]) {
    let batch = diff(&store.query_all().unwrap(), proposals).unwrap();
    ChangeApplier::new(store.clone()).apply(&batch).unwrap();
}

#[test]
fn applied_batch_updates_rows_and_log_together() {
    let store = new_store();
    seed(&store, &[proposal("SE-0001", ProposalStatus::Active)]);

    let stored = store.query_all().unwrap();
    assert_eq!(stored, vec![proposal("SE-0001", ProposalStatus::Active)]);

    let log = store.query_unread_log().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, ChangeKind::Added);
    assert_eq!(log[0].proposal.id, "SE-0001");
    assert_eq!(store.count_unread().unwrap(), 1);
}

#[test]
fn fault_between_log_append_and_row_write_rolls_back_everything() {
    let store = new_store();
    seed(&store, &[proposal("SE-0001", ProposalStatus::Active)]);
    let rows_before = store.query_all().unwrap();
    let log_before = store.query_log(None).unwrap();

    store
        .with_connection(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_proposal_insert
                 BEFORE INSERT ON proposals
                 BEGIN
                     SELECT RAISE(ABORT, 'injected fault');
                 END;",
            )
        })
        .unwrap();

    let batch = diff(
        &rows_before,
        &[
            proposal("SE-0001", ProposalStatus::Accepted),
            proposal("SE-0002", ProposalStatus::Active),
        ],
    )
    .unwrap();
    let err = ChangeApplier::new(store.clone()).apply(&batch).unwrap_err();
    assert_eq!(err.batch_len, 2);
    assert!(matches!(err.source, StoreError::Db(_)));

    assert_eq!(store.query_all().unwrap(), rows_before);
    assert_eq!(store.query_log(None).unwrap(), log_before);
}

#[test]
fn invalid_proposal_aborts_whole_transaction() {
    let store = new_store();
    let change = ProposalChange::added(proposal("SE-0001", ProposalStatus::Active));
    let err = store
        .run_transaction(&[
            StoreMutation::AppendLog(change),
            StoreMutation::Upsert(Proposal::new("SE-0002", "  ", ProposalStatus::Active)),
        ])
        .unwrap_err();

    assert!(matches!(err, StoreError::Validation(_)));
    assert!(store.query_log(None).unwrap().is_empty());
}

#[test]
fn mark_read_flips_only_requested_unread_entries() {
    let store = new_store();
    seed(
        &store,
        &[
            proposal("SE-0001", ProposalStatus::Active),
            proposal("SE-0002", ProposalStatus::Active),
        ],
    );
    let unread = store.query_unread_log().unwrap();
    assert_eq!(unread.len(), 2);

    assert_eq!(store.mark_read(&[unread[0].change_id]).unwrap(), 1);
    assert_eq!(store.mark_read(&[unread[0].change_id]).unwrap(), 0);
    assert_eq!(store.count_unread().unwrap(), 1);
    assert_eq!(
        store.query_unread_log().unwrap()[0].change_id,
        unread[1].change_id
    );

    assert_eq!(store.mark_all_read().unwrap(), 1);
    assert_eq!(store.count_unread().unwrap(), 0);
    assert_eq!(store.query_log(None).unwrap().len(), 2);
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("proposals.sqlite3");

    {
        let store = Arc::new(SqliteProposalStore::open(&path).unwrap());
        seed(&store, &[proposal("SE-0001", ProposalStatus::Deferred)]);
    }

    let reopened = SqliteProposalStore::open(&path).unwrap();
    assert_eq!(
        reopened.query_all().unwrap(),
        vec![proposal("SE-0001", ProposalStatus::Deferred)]
    );
    assert_eq!(reopened.count_unread().unwrap(), 1);
}

#[test]
fn unknown_persisted_status_is_reported_not_masked() {
    let store = new_store();
    store
        .with_connection(|conn| {
            conn.execute(
                "INSERT INTO proposals (id, name, status) VALUES ('SE-0001', 'x', 'pending');",
                [],
            )
        })
        .unwrap();

    let err = store.query_all().unwrap_err();
    assert!(matches!(err, StoreError::InvalidData(_)));
}

#[test]
fn store_rejects_connection_missing_required_column() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "DROP TABLE proposal_changes;
         CREATE TABLE proposal_changes (seq INTEGER PRIMARY KEY, change_id TEXT);",
    )
    .unwrap();

    let err = SqliteProposalStore::try_new(conn).err().unwrap();
    assert!(matches!(
        err,
        StoreError::MissingRequiredColumn {
            table: "proposal_changes",
            ..
        }
    ));
}
