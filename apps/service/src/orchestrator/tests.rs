//! Tests for check cycles
//!
//! These cover:
//! - Both units storing through a real libsql sink
//! - A crashing unit never taking the other one down
//! - Storage failures reported per unit
//! - Shutdown cancelling units still in flight
use super::*;
use crate::config::SinkConfig;
use crate::database::LibsqlSink;
use crate::database::repository::SinkError;
use crate::monitoring::Scheduler;
use crate::monitoring::types::{CheckResult, CheckType};
use async_trait::async_trait;
use std::io;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::tempdir;

/// Probe that returns a fixed result
struct FixedProbe(CheckResult);

#[async_trait]
impl Probe for FixedProbe {
    fn check_type(&self) -> CheckType {
        self.0.check_type
    }

    async fn probe(&self) -> CheckResult {
        self.0.clone()
    }
}

/// Probe that crashes mid-measurement
struct PanickingProbe;

#[async_trait]
impl Probe for PanickingProbe {
    fn check_type(&self) -> CheckType {
        CheckType::Router
    }

    async fn probe(&self) -> CheckResult {
        panic!("ping socket exploded");
    }
}

/// Probe that takes a while before answering
struct SlowProbe {
    delay: Duration,
    result: CheckResult,
}

#[async_trait]
impl Probe for SlowProbe {
    fn check_type(&self) -> CheckType {
        self.result.check_type
    }

    async fn probe(&self) -> CheckResult {
        tokio::time::sleep(self.delay).await;
        self.result.clone()
    }
}

/// Shared buffer the test subscriber writes formatted events into
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory sink that can be told to reject one check type
#[derive(Default)]
struct MemorySink {
    stored: Mutex<Vec<CheckResult>>,
    reject: Option<CheckType>,
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn persist(&self, result: &CheckResult) -> Result<i64, SinkError> {
        if self.reject == Some(result.check_type) {
            return Err(SinkError::Connect(libsql::Error::ConnectionFailed(
                "sink offline".to_string(),
            )));
        }
        let mut stored = self.stored.lock().unwrap();
        stored.push(result.clone());
        Ok(stored.len() as i64)
    }
}

fn router_ok() -> Arc<dyn Probe> {
    Arc::new(FixedProbe(
        CheckResult::new(CheckType::Router, "192.168.0.1").with_ping_stats(Some(1.8), 0.0),
    ))
}

fn router_down() -> Arc<dyn Probe> {
    Arc::new(FixedProbe(
        CheckResult::new(CheckType::Router, "192.168.0.1")
            .with_ping_stats(None, 1.0)
            .with_error("all 4 ping attempts to 192.168.0.1 failed"),
    ))
}

fn speed_result() -> CheckResult {
    let mut result =
        CheckResult::new(CheckType::SpeedTest, "unknown").with_throughput(12.5, 94.5, 18.25);
    result.target = "speedtest.example.net:8080".to_string();
    result
}

fn speed_ok() -> Arc<dyn Probe> {
    Arc::new(FixedProbe(speed_result()))
}

#[tokio::test]
async fn both_units_store_through_libsql() -> Result<()> {
    let dir = tempdir()?;
    let sink = Arc::new(LibsqlSink::new(SinkConfig::local(dir.path().join("checks.db"))));
    sink.initialize().await?;

    let orchestrator = Orchestrator::new(router_ok(), speed_ok(), sink.clone());
    let report = orchestrator.run_cycle().await;

    assert_eq!(report.persisted(), (true, true));
    assert_eq!(report.status(), CycleStatus::AllSucceeded);
    assert_eq!(sink.count().await?, 2);
    Ok(())
}

#[tokio::test]
async fn unreachable_router_is_still_stored() {
    let sink = Arc::new(MemorySink::default());
    let orchestrator = Orchestrator::new(router_down(), speed_ok(), sink.clone());

    let report = orchestrator.run_cycle().await;

    assert_eq!(report.persisted(), (true, true));
    let stored = sink.stored.lock().unwrap();
    let router = stored.iter().find(|r| r.check_type == CheckType::Router).unwrap();
    assert!(!router.reachable);
    assert_eq!(router.packet_loss, Some(1.0));
}

#[tokio::test]
async fn crashing_router_unit_does_not_stop_speed_unit() {
    let sink = Arc::new(MemorySink::default());
    let orchestrator = Orchestrator::new(Arc::new(PanickingProbe), speed_ok(), sink.clone());

    let report = orchestrator.run_cycle().await;

    assert_eq!(report.persisted(), (false, true));
    assert_eq!(report.status(), CycleStatus::SpeedOnly);
    assert_eq!(report.router, UnitOutcome::Failed("router unit panicked".to_string()));
    assert_eq!(sink.stored.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn crashing_unit_still_logs_both_outcomes() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let sink = Arc::new(MemorySink::default());
    let orchestrator = Orchestrator::new(Arc::new(PanickingProbe), speed_ok(), sink);
    orchestrator.run_cycle().await;

    let output = logs.contents();
    assert!(output.contains("router unit panicked"), "{}", output);
    assert!(
        output.contains("speed test speedtest.example.net:8080: reachable=true"),
        "{}",
        output
    );
    assert!(output.contains("speed_test result stored"), "{}", output);
    assert!(output.contains("Speed test stored, but the router check was not"), "{}", output);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_units_still_running() {
    let sink = Arc::new(MemorySink::default());
    let slow_speed = Arc::new(SlowProbe { delay: Duration::from_secs(40), result: speed_result() });
    let orchestrator = Arc::new(Orchestrator::new(router_ok(), slow_speed, sink.clone()));

    Scheduler::new(orchestrator, Duration::from_secs(60))
        .run(tokio::time::sleep(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(sink.stored.lock().unwrap().len(), 1);

    // well past the point where the speed unit would have stored its row
    tokio::time::sleep(Duration::from_secs(60)).await;

    let stored = sink.stored.lock().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].check_type, CheckType::Router);
}

#[tokio::test]
async fn storage_failure_is_reported_per_unit() {
    let sink = Arc::new(MemorySink { reject: Some(CheckType::SpeedTest), ..Default::default() });
    let orchestrator = Orchestrator::new(router_ok(), speed_ok(), sink.clone());

    let report = orchestrator.run_cycle().await;

    assert_eq!(report.persisted(), (true, false));
    assert_eq!(report.status(), CycleStatus::RouterOnly);
    assert_eq!(report.speed, UnitOutcome::NotPersisted);
}

#[tokio::test]
async fn unreachable_database_fails_both_units() {
    let sink = Arc::new(LibsqlSink::new(SinkConfig::local(
        "/nonexistent/netcheck/network_checks.db",
    )));
    let orchestrator = Orchestrator::new(router_ok(), speed_ok(), sink);

    let report = orchestrator.run_cycle().await;

    assert_eq!(report.persisted(), (false, false));
    assert_eq!(report.status(), CycleStatus::AllFailed);
}

#[test]
fn probes_build_from_default_config() {
    let (router, speed) = build_probes(&Config::default()).unwrap();
    assert_eq!(router.check_type(), CheckType::Router);
    assert_eq!(speed.check_type(), CheckType::SpeedTest);
}
