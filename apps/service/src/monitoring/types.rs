use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Target recorded when a probe fails before it learns what it was probing.
pub const UNKNOWN_TARGET: &str = "unknown";

/// Kind of network check that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    Router,
    SpeedTest,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::Router => "router",
            CheckType::SpeedTest => "speed_test",
        }
    }
}

impl std::fmt::Display for CheckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "router" => Ok(CheckType::Router),
            "speed_test" => Ok(CheckType::SpeedTest),
            other => Err(format!("unknown check type: {}", other)),
        }
    }
}

/// Result of a single network check.
///
/// Produced once by a probe and handed unchanged to the sink. Fields that do
/// not apply to the check type stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Instant the check was initiated (microsecond precision)
    pub timestamp: DateTime<Utc>,

    pub check_type: CheckType,

    /// Probed endpoint, IP or server host
    pub target: String,

    /// At least one attempt got a valid response
    pub reachable: bool,

    /// Average round trip (router) or server selection latency (speed test)
    pub latency_ms: Option<f64>,

    /// Fraction of unanswered pings in `[0, 1]`, router checks only
    pub packet_loss: Option<f64>,

    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,

    /// Error message (if anything went wrong)
    pub error_message: Option<String>,
}

impl CheckResult {
    /// Start a result for a check initiated now
    pub fn new(check_type: CheckType, target: impl Into<String>) -> Self {
        Self::started_at(check_type, target, Utc::now())
    }

    /// Start a result for a check initiated at `timestamp`
    pub fn started_at(
        check_type: CheckType,
        target: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            // storage keeps microseconds
            timestamp: timestamp.trunc_subsecs(6),
            check_type,
            target: target.into(),
            reachable: false,
            latency_ms: None,
            packet_loss: None,
            download_mbps: None,
            upload_mbps: None,
            error_message: None,
        }
    }

    /// Record ping statistics. Unreachable results never carry a latency.
    pub fn with_ping_stats(mut self, latency_ms: Option<f64>, packet_loss: f64) -> Self {
        self.reachable = latency_ms.is_some();
        self.latency_ms = latency_ms;
        self.packet_loss = Some(packet_loss);
        self
    }

    /// Record a completed throughput measurement
    pub fn with_throughput(mut self, latency_ms: f64, download_mbps: f64, upload_mbps: f64) -> Self {
        self.reachable = true;
        self.latency_ms = Some(latency_ms);
        self.download_mbps = Some(download_mbps);
        self.upload_mbps = Some(upload_mbps);
        self
    }

    /// Mark the check as failed with error
    pub fn failure(mut self, error: impl Into<String>) -> Self {
        self.reachable = false;
        self.latency_ms = None;
        self.download_mbps = None;
        self.upload_mbps = None;
        self.error_message = Some(error.into());
        self
    }

    /// Attach an error message without changing reachability
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    /// One-line summary for the logs
    pub fn summary(&self) -> String {
        let fmt_opt = |value: Option<f64>, unit: &str| {
            value.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}{}", v, unit))
        };

        let mut line = match self.check_type {
            CheckType::Router => format!(
                "router check {}: reachable={}, latency={}, packet_loss={}",
                self.target,
                self.reachable,
                fmt_opt(self.latency_ms, "ms"),
                fmt_opt(self.packet_loss, ""),
            ),
            CheckType::SpeedTest => format!(
                "speed test {}: reachable={}, latency={}, download={}, upload={}",
                self.target,
                self.reachable,
                fmt_opt(self.latency_ms, "ms"),
                fmt_opt(self.download_mbps, "Mbps"),
                fmt_opt(self.upload_mbps, "Mbps"),
            ),
        };

        if let Some(error) = &self.error_message {
            line.push_str(&format!(", error={}", error));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_clears_measurements() {
        let result = CheckResult::new(CheckType::SpeedTest, "speed.example.net")
            .with_throughput(12.5, 94.5, 40.1)
            .failure("upload stalled");

        assert!(!result.reachable);
        assert_eq!(result.latency_ms, None);
        assert_eq!(result.download_mbps, None);
        assert_eq!(result.upload_mbps, None);
        assert_eq!(result.error_message.as_deref(), Some("upload stalled"));
    }

    #[test]
    fn ping_stats_without_latency_is_unreachable() {
        let result = CheckResult::new(CheckType::Router, "192.168.0.1").with_ping_stats(None, 1.0);
        assert!(!result.reachable);
        assert_eq!(result.packet_loss, Some(1.0));
        assert_eq!(result.download_mbps, None);
    }

    #[test]
    fn timestamp_is_truncated_to_micros() {
        let result = CheckResult::new(CheckType::Router, "192.168.0.1");
        assert_eq!(result.timestamp.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn check_type_round_trips_through_str() {
        for kind in [CheckType::Router, CheckType::SpeedTest] {
            assert_eq!(kind.as_str().parse::<CheckType>().unwrap(), kind);
        }
        assert!("icmp".parse::<CheckType>().is_err());
    }

    #[test]
    fn summary_mentions_error() {
        let result = CheckResult::new(CheckType::Router, "10.0.0.1")
            .with_ping_stats(None, 1.0)
            .with_error("all 4 ping attempts failed");
        let line = result.summary();
        assert!(line.contains("reachable=false"));
        assert!(line.contains("latency=n/a"));
        assert!(line.contains("all 4 ping attempts failed"));
    }
}
