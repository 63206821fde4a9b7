//! Proposal store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist the current proposal set and the append-only change log.
//! - Execute a batch of mutations as one atomic transaction.
//! - Serve unread-log queries for badge and read/unread boundaries.
//!
//! # Invariants
//! - Proposal rows and log rows are only written through `run_transaction`;
//!   `mark_read`/`mark_all_read` only touch the `is_unread` flag.
//! - A failed `run_transaction` leaves both tables exactly as before.
//! - Log rows are never deleted.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::{open_db, DbError};
use crate::model::change::{ChangeId, ChangeKind, ProposalChange};
use crate::model::proposal::{Proposal, ProposalId, ProposalStatus, ProposalValidationError};
use log::debug;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const PROPOSAL_SELECT_SQL: &str = "SELECT
    id,
    name,
    status,
    associated_version,
    summary,
    authors,
    link
FROM proposals";

const CHANGE_SELECT_SQL: &str = "SELECT
    change_id,
    kind,
    previous_status,
    previous_version,
    proposal_json,
    is_unread,
    recorded_at
FROM proposal_changes";

const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    (
        "proposals",
        &[
            "id",
            "name",
            "status",
            "associated_version",
            "summary",
            "authors",
            "link",
            "updated_at",
        ],
    ),
    (
        "proposal_changes",
        &[
            "seq",
            "change_id",
            "proposal_id",
            "kind",
            "previous_status",
            "previous_version",
            "proposal_json",
            "is_unread",
            "recorded_at",
        ],
    ),
];

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from proposal store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// A record handed to the store failed validation.
    Validation(ProposalValidationError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
    /// Store cannot serve requests (for example a poisoned connection lock).
    Unavailable(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "proposal store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "proposal store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "proposal store requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted proposal data: {message}"),
            Self::Unavailable(message) => write!(f, "proposal store unavailable: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ProposalValidationError> for StoreError {
    fn from(value: ProposalValidationError) -> Self {
        Self::Validation(value)
    }
}

/// One write inside a store transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreMutation {
    /// Append one entry to the change log.
    AppendLog(ProposalChange),
    /// Insert, or replace every field of, the proposal keyed by its id.
    Upsert(Proposal),
    /// Delete the proposal row by id. Missing ids are a no-op.
    Delete(ProposalId),
}

/// Persistent proposal collection plus append-only change log.
pub trait ProposalStore: Send + Sync {
    /// Returns every stored proposal ordered by id.
    fn query_all(&self) -> StoreResult<Vec<Proposal>>;
    /// Applies all mutations atomically, in order.
    fn run_transaction(&self, mutations: &[StoreMutation]) -> StoreResult<()>;
    /// Returns unread log entries, oldest first.
    fn query_unread_log(&self) -> StoreResult<Vec<ProposalChange>>;
    /// Returns the number of unread log entries.
    fn count_unread(&self) -> StoreResult<u64>;
    /// Returns log entries, newest first, optionally limited.
    fn query_log(&self, limit: Option<u32>) -> StoreResult<Vec<ProposalChange>>;
    /// Marks the given entries as read. Returns how many flipped.
    fn mark_read(&self, change_ids: &[ChangeId]) -> StoreResult<usize>;
    /// Marks every unread entry as read. Returns how many flipped.
    fn mark_all_read(&self) -> StoreResult<usize>;
}

impl<S: ProposalStore + ?Sized> ProposalStore for Arc<S> {
    fn query_all(&self) -> StoreResult<Vec<Proposal>> {
        (**self).query_all()
    }

    fn run_transaction(&self, mutations: &[StoreMutation]) -> StoreResult<()> {
        (**self).run_transaction(mutations)
    }

    fn query_unread_log(&self) -> StoreResult<Vec<ProposalChange>> {
        (**self).query_unread_log()
    }

    fn count_unread(&self) -> StoreResult<u64> {
        (**self).count_unread()
    }

    fn query_log(&self, limit: Option<u32>) -> StoreResult<Vec<ProposalChange>> {
        (**self).query_log(limit)
    }

    fn mark_read(&self, change_ids: &[ChangeId]) -> StoreResult<usize> {
        (**self).mark_read(change_ids)
    }

    fn mark_all_read(&self) -> StoreResult<usize> {
        (**self).mark_all_read()
    }
}

/// SQLite-backed proposal store.
///
/// The connection is owned behind a mutex so one store can be shared across
/// async tasks; every write runs inside a `BEGIN IMMEDIATE` transaction.
pub struct SqliteProposalStore {
    conn: Mutex<Connection>,
}

impl SqliteProposalStore {
    /// Creates a store from a migrated connection.
    ///
    /// # Errors
    /// - `UninitializedConnection` when migrations were not applied.
    /// - `MissingRequiredTable` / `MissingRequiredColumn` on schema drift.
    pub fn try_new(conn: Connection) -> StoreResult<Self> {
        ensure_store_connection_ready(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens (and migrates) a database file, then creates a store on it.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::try_new(open_db(path)?)
    }

    /// Runs a read or maintenance closure on the underlying connection.
    ///
    /// Proposal and log writes must go through [`ProposalStore::run_transaction`].
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> StoreResult<T> {
        let conn = self.lock()?;
        Ok(f(&conn)?)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }
}

impl ProposalStore for SqliteProposalStore {
    fn query_all(&self) -> StoreResult<Vec<Proposal>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{PROPOSAL_SELECT_SQL} ORDER BY id ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut proposals = Vec::new();
        while let Some(row) = rows.next()? {
            proposals.push(parse_proposal_row(row)?);
        }
        Ok(proposals)
    }

    fn run_transaction(&self, mutations: &[StoreMutation]) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for mutation in mutations {
            match mutation {
                StoreMutation::AppendLog(change) => append_change(&tx, change)?,
                StoreMutation::Upsert(proposal) => upsert_proposal(&tx, proposal)?,
                StoreMutation::Delete(id) => {
                    let deleted = tx.execute("DELETE FROM proposals WHERE id = ?1;", [id])?;
                    if deleted == 0 {
                        debug!(
                            "event=store_delete module=repo status=skipped reason=missing_row proposal_id={id}"
                        );
                    }
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn query_unread_log(&self) -> StoreResult<Vec<ProposalChange>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare(&format!("{CHANGE_SELECT_SQL} WHERE is_unread = 1 ORDER BY seq ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut changes = Vec::new();
        while let Some(row) = rows.next()? {
            changes.push(parse_change_row(row)?);
        }
        Ok(changes)
    }

    fn count_unread(&self) -> StoreResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM proposal_changes WHERE is_unread = 1;",
            [],
            |row| row.get(0),
        )?;
        u64::try_from(count)
            .map_err(|_| StoreError::InvalidData(format!("negative unread count `{count}`")))
    }

    fn query_log(&self, limit: Option<u32>) -> StoreResult<Vec<ProposalChange>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{CHANGE_SELECT_SQL} ORDER BY seq DESC LIMIT ?1;"))?;
        let limit = limit.map_or(-1, i64::from);
        let mut rows = stmt.query([limit])?;
        let mut changes = Vec::new();
        while let Some(row) = rows.next()? {
            changes.push(parse_change_row(row)?);
        }
        Ok(changes)
    }

    fn mark_read(&self, change_ids: &[ChangeId]) -> StoreResult<usize> {
        if change_ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut flipped = 0;
        for change_id in change_ids {
            flipped += tx.execute(
                "UPDATE proposal_changes
                 SET is_unread = 0
                 WHERE change_id = ?1
                   AND is_unread = 1;",
                [change_id.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(flipped)
    }

    fn mark_all_read(&self) -> StoreResult<usize> {
        let conn = self.lock()?;
        let flipped = conn.execute(
            "UPDATE proposal_changes SET is_unread = 0 WHERE is_unread = 1;",
            [],
        )?;
        Ok(flipped)
    }
}

fn append_change(tx: &Transaction<'_>, change: &ProposalChange) -> StoreResult<()> {
    let proposal_json = serde_json::to_string(&change.proposal)
        .map_err(|err| StoreError::InvalidData(format!("cannot encode proposal: {err}")))?;
    tx.execute(
        "INSERT INTO proposal_changes (
            change_id,
            proposal_id,
            kind,
            previous_status,
            previous_version,
            proposal_json,
            is_unread,
            recorded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
        params![
            change.change_id.to_string(),
            change.proposal.id.as_str(),
            change.kind.as_str(),
            change.previous_status.map(ProposalStatus::as_str),
            change.previous_version.as_deref(),
            proposal_json,
            bool_to_int(change.is_unread),
            change.recorded_at_ms,
        ],
    )?;
    Ok(())
}

fn upsert_proposal(tx: &Transaction<'_>, proposal: &Proposal) -> StoreResult<()> {
    proposal.validate()?;
    let authors = serde_json::to_string(&proposal.authors)
        .map_err(|err| StoreError::InvalidData(format!("cannot encode authors: {err}")))?;
    tx.execute(
        "INSERT INTO proposals (
            id,
            name,
            status,
            associated_version,
            summary,
            authors,
            link
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            status = excluded.status,
            associated_version = excluded.associated_version,
            summary = excluded.summary,
            authors = excluded.authors,
            link = excluded.link,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![
            proposal.id.as_str(),
            proposal.name.as_str(),
            proposal.status.as_str(),
            proposal.associated_version.as_deref(),
            proposal.summary.as_deref(),
            authors,
            proposal.link.as_deref(),
        ],
    )?;
    Ok(())
}

fn parse_proposal_row(row: &Row<'_>) -> StoreResult<Proposal> {
    let id: String = row.get("id")?;
    let status_text: String = row.get("status")?;
    let status = ProposalStatus::parse(&status_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid status `{status_text}` in proposals.status for `{id}`"
        ))
    })?;
    let authors_text: String = row.get("authors")?;
    let authors: Vec<String> = serde_json::from_str(&authors_text).map_err(|_| {
        StoreError::InvalidData(format!(
            "invalid authors value `{authors_text}` in proposals.authors for `{id}`"
        ))
    })?;

    let proposal = Proposal {
        id,
        name: row.get("name")?,
        status,
        associated_version: row.get("associated_version")?,
        summary: row.get("summary")?,
        authors,
        link: row.get("link")?,
    };
    proposal.validate()?;
    Ok(proposal)
}

fn parse_change_row(row: &Row<'_>) -> StoreResult<ProposalChange> {
    let change_id_text: String = row.get("change_id")?;
    let change_id = Uuid::parse_str(&change_id_text).map_err(|_| {
        StoreError::InvalidData(format!(
            "invalid uuid value `{change_id_text}` in proposal_changes.change_id"
        ))
    })?;

    let kind_text: String = row.get("kind")?;
    let kind = ChangeKind::parse(&kind_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid change kind `{kind_text}` in proposal_changes.kind"
        ))
    })?;

    let previous_status = match row.get::<_, Option<String>>("previous_status")? {
        Some(value) => Some(ProposalStatus::parse(&value).ok_or_else(|| {
            StoreError::InvalidData(format!(
                "invalid status `{value}` in proposal_changes.previous_status"
            ))
        })?),
        None => None,
    };

    let proposal_json: String = row.get("proposal_json")?;
    let proposal: Proposal = serde_json::from_str(&proposal_json).map_err(|err| {
        StoreError::InvalidData(format!(
            "invalid proposal snapshot for change `{change_id}`: {err}"
        ))
    })?;

    let is_unread = match row.get::<_, i64>("is_unread")? {
        0 => false,
        1 => true,
        other => {
            return Err(StoreError::InvalidData(format!(
                "invalid is_unread value `{other}` in proposal_changes.is_unread"
            )));
        }
    };

    Ok(ProposalChange {
        change_id,
        proposal,
        kind,
        previous_status,
        previous_version: row.get("previous_version")?,
        is_unread,
        recorded_at_ms: row.get("recorded_at")?,
    })
}

fn ensure_store_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for &(table, columns) in REQUIRED_COLUMNS {
        if !table_exists(conn, table)? {
            return Err(StoreError::MissingRequiredTable(table));
        }
        for column in columns.iter().copied() {
            if !table_has_column(conn, table, column)? {
                return Err(StoreError::MissingRequiredColumn { table, column });
            }
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
