//! Domain model for proposals and their change log.
//!
//! # Responsibility
//! - Define canonical data structures shared by store, differ and notifier.
//!
//! # Invariants
//! - Every proposal is identified by a stable `ProposalId`.
//! - Change records are append-only; removal of a proposal is a hard delete
//!   of the row, preserved only through its `Removed` log entry.

pub mod change;
pub mod proposal;
