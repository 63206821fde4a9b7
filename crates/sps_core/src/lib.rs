//! Synchronization core for proposal status tracking.
//! This crate is the single source of truth for stored proposals and their change log.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sync;

pub use config::{ConfigError, NotificationPolicy, SyncConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::change::{ChangeId, ChangeKind, ProposalChange};
pub use model::proposal::{Proposal, ProposalId, ProposalStatus, ProposalValidationError};
pub use repo::proposal_store::{
    ProposalStore, SqliteProposalStore, StoreError, StoreMutation, StoreResult,
};
pub use service::change_log_service::ChangeLogService;
pub use sync::applier::{ApplyError, ChangeApplier};
pub use sync::badge::UnreadBadge;
pub use sync::cycle::{SyncCycle, SyncPhase};
pub use sync::differ::{diff, DiffError};
pub use sync::notifier::{
    ChangeNotifier, LogNotificationSurface, NotificationDeliveryError, NotificationSurface,
    NotifySummary, ProposalStatusNotifier,
};
pub use sync::periodic::{PeriodicHandle, PeriodicStats, PeriodicSynchronizer};
pub use sync::remote::{FetchError, JsonFileSource, RemoteStatusSource};
pub use sync::synchronizer::{SyncError, SyncReport, SyncResult, Synchronize, Synchronizer};

/// Minimal health-check API for front-end wiring.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
