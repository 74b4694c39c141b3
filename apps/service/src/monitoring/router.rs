use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::checker::Probe;
use super::ping::{PingError, Pinger};
use super::types::{CheckResult, CheckType};

/// Reachability probe against the local router
pub struct RouterProbe {
    target: String,
    attempts: u32,
    attempt_timeout: Duration,
    pinger: Arc<dyn Pinger>,
}

impl RouterProbe {
    pub fn new(
        target: impl Into<String>,
        attempts: u32,
        attempt_timeout: Duration,
        pinger: Arc<dyn Pinger>,
    ) -> Self {
        Self { target: target.into(), attempts: attempts.max(1), attempt_timeout, pinger }
    }

    /// Ping the router `attempts` times, one after another.
    ///
    /// A failed attempt counts as a lost packet and never stops the remaining
    /// attempts.
    pub async fn probe_router(&self) -> CheckResult {
        let result = CheckResult::new(CheckType::Router, self.target.clone());
        info!("Starting router check against {}", self.target);

        let mut round_trips = Vec::with_capacity(self.attempts as usize);
        for attempt in 0..self.attempts {
            match self.attempt(attempt).await {
                Ok(rtt) => {
                    let ms = rtt.as_secs_f64() * 1000.0;
                    debug!("Ping {} to {}: {:.2}ms", attempt + 1, self.target, ms);
                    round_trips.push(ms);
                }
                Err(e) => debug!("Ping {} to {} lost: {}", attempt + 1, self.target, e),
            }
        }

        let stats = PingStats::new(self.attempts, &round_trips);
        let result = result.with_ping_stats(stats.mean_latency_ms, stats.packet_loss);

        if result.reachable {
            info!(
                "Router check finished: latency={:.2}ms, packet_loss={:.2}",
                stats.mean_latency_ms.unwrap_or_default(),
                stats.packet_loss
            );
            result
        } else {
            let message = format!("all {} ping attempts to {} failed", self.attempts, self.target);
            warn!("Router check failed: {}", message);
            result.with_error(message)
        }
    }

    async fn attempt(&self, attempt: u32) -> Result<Duration, PingError> {
        let sequence = u16::try_from(attempt).unwrap_or(u16::MAX);
        timeout(self.attempt_timeout, self.pinger.ping(&self.target, sequence, self.attempt_timeout))
            .await
            .map_err(|_| PingError::Timeout)?
    }
}

#[async_trait::async_trait]
impl Probe for RouterProbe {
    fn check_type(&self) -> CheckType {
        CheckType::Router
    }

    async fn probe(&self) -> CheckResult {
        self.probe_router().await
    }
}

/// Aggregate of one round of ping attempts
#[derive(Debug, Clone, PartialEq)]
pub struct PingStats {
    pub sent: u32,
    pub received: u32,
    pub packet_loss: f64,
    pub mean_latency_ms: Option<f64>,
}

impl PingStats {
    pub fn new(sent: u32, round_trips_ms: &[f64]) -> Self {
        let received = round_trips_ms.len() as u32;
        let lost = sent.saturating_sub(received);
        let mean_latency_ms = if round_trips_ms.is_empty() {
            None
        } else {
            Some(round_trips_ms.iter().sum::<f64>() / round_trips_ms.len() as f64)
        };

        Self {
            sent,
            received,
            packet_loss: if sent == 0 { 1.0 } else { lost as f64 / sent as f64 },
            mean_latency_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed list of attempt outcomes
    struct ScriptedPinger {
        replies: Mutex<VecDeque<Option<f64>>>,
        calls: Mutex<Vec<u16>>,
    }

    impl ScriptedPinger {
        fn new(replies: &[Option<f64>]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().copied().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Pinger for ScriptedPinger {
        async fn ping(
            &self,
            _target: &str,
            sequence: u16,
            _timeout: Duration,
        ) -> Result<Duration, PingError> {
            self.calls.lock().unwrap().push(sequence);
            match self.replies.lock().unwrap().pop_front().flatten() {
                Some(ms) => Ok(Duration::from_secs_f64(ms / 1000.0)),
                None => Err(PingError::NoReply),
            }
        }
    }

    /// Never answers
    struct HangingPinger;

    #[async_trait::async_trait]
    impl Pinger for HangingPinger {
        async fn ping(&self, _: &str, _: u16, _: Duration) -> Result<Duration, PingError> {
            std::future::pending().await
        }
    }

    fn probe(pinger: Arc<dyn Pinger>, attempts: u32) -> RouterProbe {
        RouterProbe::new("192.168.0.1", attempts, Duration::from_secs(5), pinger)
    }

    #[tokio::test]
    async fn all_replies_give_zero_loss_and_mean_latency() {
        let pinger = ScriptedPinger::new(&[Some(2.0), Some(4.0), Some(3.0), Some(5.0)]);
        let result = probe(pinger.clone(), 4).probe_router().await;

        assert!(result.reachable);
        assert_eq!(result.check_type, CheckType::Router);
        assert_eq!(result.target, "192.168.0.1");
        assert_eq!(result.packet_loss, Some(0.0));
        assert!((result.latency_ms.unwrap() - 3.5).abs() < 1e-6);
        assert!(result.error_message.is_none());
        assert_eq!(result.download_mbps, None);
        assert_eq!(result.upload_mbps, None);
        assert_eq!(*pinger.calls.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn partial_loss_averages_only_replies() {
        let pinger = ScriptedPinger::new(&[None, Some(1.5), None, Some(2.5)]);
        let result = probe(pinger, 4).probe_router().await;

        assert!(result.reachable);
        assert_eq!(result.packet_loss, Some(0.5));
        assert!((result.latency_ms.unwrap() - 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn losses_are_counted_per_attempt_for_any_count() {
        for attempts in 1..=6u32 {
            for successes in 0..=attempts {
                let replies: Vec<Option<f64>> = (0..attempts)
                    .map(|i| if i < successes { Some(1.0 + i as f64) } else { None })
                    .collect();
                let result = probe(ScriptedPinger::new(&replies), attempts).probe_router().await;

                let lost = attempts - successes;
                assert_eq!(result.packet_loss, Some(lost as f64 / attempts as f64));
                assert_eq!(result.reachable, successes > 0);
                assert_eq!(result.latency_ms.is_some(), successes > 0);
            }
        }
    }

    #[tokio::test]
    async fn total_loss_is_unreachable_with_message() {
        let pinger = ScriptedPinger::new(&[None, None, None, None]);
        let result = probe(pinger.clone(), 4).probe_router().await;

        assert!(!result.reachable);
        assert_eq!(result.latency_ms, None);
        assert_eq!(result.packet_loss, Some(1.0));
        assert!(!result.error_message.unwrap().is_empty());
        // every attempt still ran
        assert_eq!(pinger.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_attempts_are_bounded_by_timeout() {
        let started = tokio::time::Instant::now();
        let result = probe(Arc::new(HangingPinger), 3).probe_router().await;

        assert!(!result.reachable);
        assert_eq!(result.packet_loss, Some(1.0));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(15) && elapsed < Duration::from_secs(16));
    }

    #[test]
    fn ping_stats_math() {
        let stats = PingStats::new(4, &[1.0, 2.0, 3.0]);
        assert_eq!(stats.received, 3);
        assert_eq!(stats.packet_loss, 0.25);
        assert_eq!(stats.mean_latency_ms, Some(2.0));

        let empty = PingStats::new(4, &[]);
        assert_eq!(empty.packet_loss, 1.0);
        assert_eq!(empty.mean_latency_ms, None);
    }
}
