//! Per-cycle phase tracking and activity signal.
//!
//! # Responsibility
//! - Model the synchronizer phase machine for one fetch→diff→apply→notify pass.
//! - Publish phase and busy/idle transitions to observers.
//! - Carry the cancellation token for the cycle's fetch step.
//!
//! # Invariants
//! - A cycle is single-use: it leaves `Idle` once and ends in `Done` or `Failed`.
//! - `is_active` is true exactly while the phase is `Fetching..=Notifying`.
//! - A cycle abandoned mid-way is forced to `Failed`, clearing activity.

use log::debug;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Phase of one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Fetching,
    Diffing,
    Applying,
    Notifying,
    /// Completed; carries the number of committed changes.
    Done { changes: usize },
    /// Ended without committing; carries the error message.
    Failed(String),
}

impl SyncPhase {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Fetching | Self::Diffing | Self::Applying | Self::Notifying
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Diffing => "diffing",
            Self::Applying => "applying",
            Self::Notifying => "notifying",
            Self::Done { .. } => "done",
            Self::Failed(_) => "failed",
        }
    }
}

/// Transient state of one synchronization pass.
#[derive(Debug)]
pub struct SyncCycle {
    id: Uuid,
    phase: watch::Sender<SyncPhase>,
    active: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl Default for SyncCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncCycle {
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Cycle whose fetch is cancelled together with `cancel`.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            phase: watch::Sender::new(SyncPhase::Idle),
            active: watch::Sender::new(false),
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Busy indicator stream for this cycle.
    pub fn subscribe_activity(&self) -> watch::Receiver<bool> {
        self.active.subscribe()
    }

    /// Requests cancellation. Only honoured while fetching.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Moves `Idle → Fetching`; `None` when this cycle was already started.
    pub(crate) fn begin(&self) -> Option<CycleGuard<'_>> {
        let started = self.phase.send_if_modified(|phase| {
            if *phase == SyncPhase::Idle {
                *phase = SyncPhase::Fetching;
                true
            } else {
                false
            }
        });
        if !started {
            return None;
        }
        self.active.send_replace(true);
        debug!(
            "event=sync_phase module=sync status=ok cycle_id={} phase=fetching",
            self.id
        );
        Some(CycleGuard { cycle: self })
    }

    fn enter(&self, next: SyncPhase) {
        let active = next.is_active();
        debug!(
            "event=sync_phase module=sync status=ok cycle_id={} phase={}",
            self.id,
            next.name()
        );
        self.phase.send_replace(next);
        self.active.send_if_modified(|current| {
            let changed = *current != active;
            *current = active;
            changed
        });
    }
}

/// Drives phase transitions of a started cycle.
///
/// Dropping the guard before a terminal phase marks the cycle `Failed`.
pub(crate) struct CycleGuard<'a> {
    cycle: &'a SyncCycle,
}

impl CycleGuard<'_> {
    pub(crate) fn enter(&self, next: SyncPhase) {
        self.cycle.enter(next);
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.cycle.cancel
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.cycle.phase.borrow().is_terminal() {
            self.cycle
                .enter(SyncPhase::Failed("cycle abandoned before completion".to_string()));
        }
    }
}
