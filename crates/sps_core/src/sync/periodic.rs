//! Periodic, coalescing decorator over any `Synchronize` implementation.
//!
//! # Responsibility
//! - Re-run the inner synchronizer at time zero and then every `period`.
//! - Keep inner cycles from overlapping.
//!
//! # Invariants
//! - At most one inner cycle runs at a time.
//! - A timer tick while a cycle is in flight is dropped and counted.
//! - A direct `synchronize` call waits for the in-flight cycle, then runs.
//! - Failed cycles are not retried early; the next tick runs as usual.

use crate::sync::cycle::SyncCycle;
use crate::sync::synchronizer::{SyncResult, SyncReport, Synchronize};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Counters of what the timer and callers asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodicStats {
    /// Ticks that started a cycle.
    pub triggered: u64,
    /// Ticks dropped because a cycle was in flight.
    pub suppressed: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    triggered: AtomicU64,
    suppressed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PeriodicStats {
        PeriodicStats {
            triggered: self.triggered.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

struct Shared<S> {
    inner: S,
    gate: Arc<Mutex<()>>,
    counters: Counters,
    active: watch::Sender<bool>,
}

impl<S: Synchronize> Shared<S> {
    async fn run_gated(&self, cycle: &SyncCycle, permit: OwnedMutexGuard<()>) -> SyncResult<SyncReport> {
        self.active.send_replace(true);
        let mut run = GatedRun {
            counters: &self.counters,
            active: &self.active,
            succeeded: None,
            _permit: permit,
        };
        let outcome = self.inner.synchronize(cycle).await;
        run.succeeded = Some(outcome.is_ok());
        outcome
    }
}

/// Bookkeeping for one gated run, settled on drop.
///
/// A run whose future is dropped before the inner cycle returns counts as
/// failed. Activity clears before the gate is released.
struct GatedRun<'a> {
    counters: &'a Counters,
    active: &'a watch::Sender<bool>,
    succeeded: Option<bool>,
    _permit: OwnedMutexGuard<()>,
}

impl Drop for GatedRun<'_> {
    fn drop(&mut self) {
        let counter = match self.succeeded {
            Some(true) => &self.counters.completed,
            Some(false) => &self.counters.failed,
            None => {
                debug!("event=periodic_run module=sync status=abandoned");
                &self.counters.failed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.active.send_replace(false);
    }
}

/// Wraps a synchronizer and drives it on a fixed period.
pub struct PeriodicSynchronizer<S> {
    shared: Arc<Shared<S>>,
    period: Duration,
}

impl<S: Synchronize + 'static> PeriodicSynchronizer<S> {
    pub fn new(inner: S, period: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner,
                gate: Arc::new(Mutex::new(())),
                counters: Counters::default(),
                active: watch::Sender::new(false),
            }),
            period,
        }
    }

    pub fn inner(&self) -> &S {
        &self.shared.inner
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stats(&self) -> PeriodicStats {
        self.shared.counters.snapshot()
    }

    /// True while any wrapped cycle is running, timer-driven or direct.
    pub fn subscribe_activity(&self) -> watch::Receiver<bool> {
        self.shared.active.subscribe()
    }

    pub fn is_active(&self) -> bool {
        *self.shared.active.borrow()
    }

    /// Starts the timer task. The first tick fires immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self) -> PeriodicHandle {
        let stop = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let period = self.period;
        let loop_stop = stop.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                "event=periodic_sync module=sync status=start period_secs={}",
                period.as_secs()
            );
            loop {
                tokio::select! {
                    _ = loop_stop.cancelled() => break,
                    _ = ticker.tick() => on_tick(&shared, &loop_stop),
                }
            }
            info!("event=periodic_sync module=sync status=stopped");
        });

        PeriodicHandle {
            stop,
            gate: Arc::clone(&self.shared.gate),
            task: Some(task),
        }
    }
}

fn on_tick<S: Synchronize + 'static>(shared: &Arc<Shared<S>>, stop: &CancellationToken) {
    let permit = match Arc::clone(&shared.gate).try_lock_owned() {
        Ok(permit) => permit,
        Err(_) => {
            shared.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            debug!("event=periodic_tick module=sync status=suppressed reason=cycle_in_flight");
            return;
        }
    };
    shared.counters.triggered.fetch_add(1, Ordering::Relaxed);

    let shared = Arc::clone(shared);
    // Stopping the timer also cancels a fetch that is still waiting.
    let cycle = SyncCycle::with_cancellation(stop.child_token());
    tokio::spawn(async move {
        if let Err(err) = shared.run_gated(&cycle, permit).await {
            warn!(
                "event=periodic_tick module=sync status=error cycle_id={} error_code={}",
                cycle.id(),
                err.code()
            );
        }
    });
}

#[async_trait]
impl<S: Synchronize + 'static> Synchronize for PeriodicSynchronizer<S> {
    async fn synchronize(&self, cycle: &SyncCycle) -> SyncResult<SyncReport> {
        let permit = Arc::clone(&self.shared.gate).lock_owned().await;
        self.shared.run_gated(cycle, permit).await
    }
}

/// Controls a running timer task. Dropping it stops the timer.
pub struct PeriodicHandle {
    stop: CancellationToken,
    gate: Arc<Mutex<()>>,
    task: Option<JoinHandle<()>>,
}

impl PeriodicHandle {
    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stops the timer and waits for an in-flight cycle to finish.
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!("event=periodic_sync module=sync status=error error={}", err);
            }
        }
        let _idle = self.gate.lock().await;
    }
}

impl Drop for PeriodicHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
