//! Core use-case services.
//!
//! # Responsibility
//! - Expose store reads and the read/unread boundary to front-ends.
//! - Keep front-ends decoupled from storage details.

pub mod change_log_service;
