//! Orchestrator module - runs one check cycle
//!
//! A cycle runs the router unit and the speed unit side by side. Each unit
//! probes, logs what it saw, then tries to store the result. Units never
//! affect each other: a crash or storage failure in one still lets the other
//! finish and the cycle return.

#[cfg(test)]
mod tests;

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::Config;
use crate::database::{ResultSink, persist_result};
use crate::monitoring::checker::Probe;
use crate::monitoring::router::RouterProbe;
use crate::monitoring::scheduler::CycleRunner;
use crate::monitoring::speed::{HttpSpeedBackend, SpeedProbe};
use crate::monitoring::types::CheckType;

/// Outcome of one probe-and-store unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Result stored
    Persisted,
    /// Probe ran but the sink rejected the result
    NotPersisted,
    /// The unit itself failed before finishing
    Failed(String),
}

impl UnitOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, UnitOutcome::Persisted)
    }
}

/// How a cycle went overall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    AllSucceeded,
    RouterOnly,
    SpeedOnly,
    AllFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub router: UnitOutcome,
    pub speed: UnitOutcome,
}

impl CycleReport {
    /// `(router_persisted, speed_persisted)`
    pub fn persisted(&self) -> (bool, bool) {
        (self.router.is_persisted(), self.speed.is_persisted())
    }

    pub fn status(&self) -> CycleStatus {
        match self.persisted() {
            (true, true) => CycleStatus::AllSucceeded,
            (true, false) => CycleStatus::RouterOnly,
            (false, true) => CycleStatus::SpeedOnly,
            (false, false) => CycleStatus::AllFailed,
        }
    }
}

/// Build the router and speed probes described by the configuration
pub fn build_probes(config: &Config) -> Result<(Arc<dyn Probe>, Arc<dyn Probe>)> {
    let router = RouterProbe::new(
        config.probe.router_target.clone(),
        config.probe.ping_count,
        config.probe.ping_timeout(),
        config.probe.ping_transport.pinger(),
    );

    let backend = HttpSpeedBackend::new(config.probe.speed_timeout_seconds)?;
    let speed = SpeedProbe::new(
        Arc::new(backend),
        config.probe.speed_server.clone(),
        config.probe.speed_timeout(),
    );

    Ok((Arc::new(router), Arc::new(speed)))
}

/// Check orchestrator
pub struct Orchestrator {
    router: Arc<dyn Probe>,
    speed: Arc<dyn Probe>,
    sink: Arc<dyn ResultSink>,
}

impl Orchestrator {
    pub fn new(router: Arc<dyn Probe>, speed: Arc<dyn Probe>, sink: Arc<dyn ResultSink>) -> Self {
        Self { router, speed, sink }
    }

    pub fn from_config(config: &Config, sink: Arc<dyn ResultSink>) -> Result<Self> {
        let (router, speed) = build_probes(config)?;
        Ok(Self::new(router, speed, sink))
    }

    /// Run both units concurrently and wait for both.
    ///
    /// The units live in a `JoinSet`, so dropping this future (an aborted
    /// cycle) cancels whichever unit is still running.
    pub async fn run_cycle(&self) -> CycleReport {
        info!("Starting network checks");

        let mut units = JoinSet::new();
        let router_id = units.spawn(unit(self.router.clone(), self.sink.clone())).id();
        units.spawn(unit(self.speed.clone(), self.sink.clone()));

        let mut router = None;
        let mut speed = None;
        while let Some(joined) = units.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    let check = if e.id() == router_id {
                        self.router.check_type()
                    } else {
                        self.speed.check_type()
                    };
                    (e.id(), failed_unit(check, &e))
                }
            };
            if id == router_id {
                router = Some(outcome);
            } else {
                speed = Some(outcome);
            }
        }

        let missing = || UnitOutcome::Failed("unit did not report".to_string());
        let report = CycleReport {
            router: router.unwrap_or_else(missing),
            speed: speed.unwrap_or_else(missing),
        };

        match report.status() {
            CycleStatus::AllSucceeded => info!("All checks completed and stored"),
            CycleStatus::RouterOnly => {
                warn!("Router check stored, but the speed test was not")
            }
            CycleStatus::SpeedOnly => {
                warn!("Speed test stored, but the router check was not")
            }
            CycleStatus::AllFailed => error!("No check results were stored this cycle"),
        }

        report
    }
}

#[async_trait::async_trait]
impl CycleRunner for Orchestrator {
    async fn run_cycle(&self) -> CycleReport {
        Orchestrator::run_cycle(self).await
    }
}

fn unit(
    probe: Arc<dyn Probe>,
    sink: Arc<dyn ResultSink>,
) -> impl Future<Output = UnitOutcome> + Send + 'static {
    let span = info_span!("unit", check = %probe.check_type());
    run_unit(probe, sink).instrument(span)
}

/// Probe, log, then store. The summary is logged before storing so the
/// observation survives a storage outage.
async fn run_unit(probe: Arc<dyn Probe>, sink: Arc<dyn ResultSink>) -> UnitOutcome {
    let result = probe.probe().await;
    info!("{}", result.summary());

    if persist_result(sink.as_ref(), &result).await {
        info!("{} result stored", result.check_type);
        UnitOutcome::Persisted
    } else {
        warn!("{} result was not stored", result.check_type);
        UnitOutcome::NotPersisted
    }
}

fn failed_unit(check: CheckType, e: &JoinError) -> UnitOutcome {
    let reason = if e.is_panic() {
        format!("{} unit panicked", check)
    } else {
        format!("{} unit was cancelled", check)
    };
    error!("{}: {}", reason, e);
    UnitOutcome::Failed(reason)
}
