//! ---
//! upd_section: "02-update-pipeline"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Version probing, download, install and restart of the target application."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::orchestrator::UpdateOrchestrator;

/// Source of cycle triggers.
#[async_trait]
pub trait Scheduler: Send {
    /// Resolve when the next cycle is due with its 1-based tick number.
    /// `None` ends the schedule.
    async fn next_fire(&mut self) -> Option<u64>;
}

/// Fixed-period trigger. The first tick fires immediately.
///
/// Must be constructed inside a tokio runtime.
pub struct IntervalScheduler {
    interval: Interval,
    period: Duration,
    fired: u64,
}

impl IntervalScheduler {
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            period,
            fired: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[async_trait]
impl Scheduler for IntervalScheduler {
    async fn next_fire(&mut self) -> Option<u64> {
        self.interval.tick().await;
        self.fired += 1;
        Some(self.fired)
    }
}

/// Run cycles on every trigger until `shutdown` flips to `true` or the
/// scheduler is exhausted. A cycle in flight is always completed.
///
/// Returns the number of cycles run.
pub async fn run_schedule<S: Scheduler>(
    orchestrator: Arc<UpdateOrchestrator>,
    mut scheduler: S,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut cycles = 0;
    let mut shutdown_open = true;
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            biased;
            changed = shutdown.changed(), if shutdown_open => {
                if changed.is_err() {
                    // Handle dropped without a shutdown request; keep running.
                    shutdown_open = false;
                }
            }
            fire = scheduler.next_fire() => {
                let Some(tick) = fire else {
                    debug!("schedule exhausted");
                    break;
                };
                let report = orchestrator.run_cycle().await;
                cycles += 1;
                debug!(tick, outcome = report.outcome.as_str(), "scheduled cycle complete");
            }
        }
    }
    info!(cycles, "update schedule stopped");
    cycles
}
