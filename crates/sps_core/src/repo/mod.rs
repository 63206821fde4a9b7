//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the store contract consumed by the sync core.
//! - Isolate SQLite query details from sync orchestration.
//!
//! # Invariants
//! - Store writes validate proposals before persistence.
//! - Store APIs return semantic errors in addition to DB transport errors.

pub mod proposal_store;
