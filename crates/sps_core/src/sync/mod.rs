//! Proposal status synchronization.
//!
//! # Responsibility
//! - Fetch full snapshots, diff them against the store and commit the batch.
//! - Notify about committed changes and publish activity and unread counts.
//! - Drive cycles periodically without overlapping them.
//!
//! # Invariants
//! - Every committed change has exactly one change log entry.
//! - A failed cycle leaves store contents and change log untouched.

pub mod applier;
pub mod badge;
pub mod cycle;
pub mod differ;
pub mod notifier;
pub mod periodic;
pub mod remote;
pub mod synchronizer;
