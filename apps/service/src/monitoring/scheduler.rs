use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior, interval};

use crate::orchestrator::CycleReport;

/// How often the loop wakes up to check for due work and shutdown
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("check cycle task failed: {0}")]
    CycleTask(#[from] JoinError),
}

/// Something that runs one full check cycle
#[async_trait]
pub trait CycleRunner: Send + Sync + 'static {
    async fn run_cycle(&self) -> CycleReport;
}

/// Counters reported when the loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles_started: u64,
    pub ticks_skipped: u64,
}

/// Fixed-interval scheduler.
///
/// Runs one cycle immediately, then one per interval boundary measured from
/// start. At most one cycle is in flight: a boundary that passes while the
/// previous cycle is still running is skipped, not queued.
pub struct Scheduler<R> {
    runner: Arc<R>,
    interval: Duration,
}

impl<R: CycleRunner> Scheduler<R> {
    pub fn new(runner: Arc<R>, interval: Duration) -> Self {
        Self { runner, interval }
    }

    fn spawn_cycle(&self) -> JoinHandle<CycleReport> {
        let runner = self.runner.clone();
        tokio::spawn(async move { runner.run_cycle().await })
    }

    /// Run until `shutdown` resolves.
    ///
    /// A cycle still in flight at shutdown is aborted. A cycle task that
    /// panics stops the loop with an error.
    pub async fn run<F>(self, shutdown: F) -> Result<SchedulerStats, SchedulerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut stats = SchedulerStats::default();
        let mut next_due = Instant::now() + self.interval;

        tracing::info!("Running initial check cycle");
        let mut in_flight = Some(self.spawn_cycle());
        stats.cycles_started += 1;

        let mut ticker = interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    if let Some(handle) = in_flight.take() {
                        if !handle.is_finished() {
                            tracing::warn!("Abandoning check cycle still in progress");
                        }
                        handle.abort();
                    }
                    tracing::info!(
                        "Scheduler stopped after {} cycles ({} skipped)",
                        stats.cycles_started,
                        stats.ticks_skipped
                    );
                    return Ok(stats);
                }
                _ = ticker.tick() => {}
            }

            if let Some(handle) = in_flight.take_if(|handle| handle.is_finished()) {
                handle.await?;
            }

            let now = Instant::now();
            if now < next_due {
                continue;
            }

            if in_flight.is_some() {
                stats.ticks_skipped += 1;
                tracing::warn!("Previous check cycle still running, skipping this one");
            } else {
                tracing::debug!("Check cycle due");
                in_flight = Some(self.spawn_cycle());
                stats.cycles_started += 1;
            }

            while next_due <= now {
                next_due += self.interval;
            }
        }
    }
}
