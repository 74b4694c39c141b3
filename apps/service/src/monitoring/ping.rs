//! Ping transports used by the router probe.
//!
//! Both transports answer the same question (did one echo request get a reply,
//! and how long did it take) so the router probe does not care which one runs.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use surge_ping::{Client, Config as IcmpConfig, ICMP, PingIdentifier, PingSequence, SurgeError};
use thiserror::Error;
use tokio::process::Command;

/// Payload carried by raw-socket echo requests
const ICMP_PAYLOAD: [u8; 56] = [0; 56];

#[derive(Debug, Error)]
pub enum PingError {
    #[error("failed to resolve {0}")]
    Resolve(String),
    #[error("failed to open ICMP socket: {0}")]
    Socket(#[source] std::io::Error),
    #[error("failed to run system ping: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("request timed out")]
    Timeout,
    #[error("no reply from host")]
    NoReply,
    #[error("malformed reply: {0}")]
    Malformed(String),
}

/// Which ping implementation the router probe uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingTransport {
    /// Raw ICMP socket
    #[default]
    Icmp,
    /// The host's `ping` utility
    System,
}

impl std::fmt::Display for PingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PingTransport::Icmp => write!(f, "icmp"),
            PingTransport::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for PingTransport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "icmp" => Ok(PingTransport::Icmp),
            "system" => Ok(PingTransport::System),
            other => Err(format!("unknown ping transport: {}", other)),
        }
    }
}

impl PingTransport {
    pub fn pinger(self) -> Arc<dyn Pinger> {
        match self {
            PingTransport::Icmp => Arc::new(IcmpPinger),
            PingTransport::System => Arc::new(SystemPinger),
        }
    }
}

/// Sends one echo request and reports the round trip time
#[async_trait::async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, target: &str, sequence: u16, timeout: Duration)
        -> Result<Duration, PingError>;
}

/// Raw-socket ICMP pinger.
///
/// Needs `CAP_NET_RAW` or an unprivileged ICMP datagram socket
/// (`net.ipv4.ping_group_range`).
pub struct IcmpPinger;

#[async_trait::async_trait]
impl Pinger for IcmpPinger {
    async fn ping(
        &self,
        target: &str,
        sequence: u16,
        timeout: Duration,
    ) -> Result<Duration, PingError> {
        let ip = resolve(target).await?;
        let config = match ip {
            IpAddr::V4(_) => IcmpConfig::default(),
            IpAddr::V6(_) => IcmpConfig::builder().kind(ICMP::V6).build(),
        };
        let client = Client::new(&config).map_err(PingError::Socket)?;

        let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
        pinger.timeout(timeout);

        match pinger.ping(PingSequence(sequence), &ICMP_PAYLOAD).await {
            Ok((_, rtt)) => Ok(rtt),
            Err(SurgeError::Timeout { .. }) => Err(PingError::Timeout),
            Err(e) => Err(PingError::Malformed(e.to_string())),
        }
    }
}

/// Shells out to `ping -c 1 -W <secs>`
pub struct SystemPinger;

#[async_trait::async_trait]
impl Pinger for SystemPinger {
    async fn ping(
        &self,
        target: &str,
        _sequence: u16,
        timeout: Duration,
    ) -> Result<Duration, PingError> {
        let wait_seconds = timeout.as_secs().max(1).to_string();
        let output = Command::new("ping")
            .args(["-c", "1", "-W", wait_seconds.as_str(), target])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(PingError::Spawn)?;

        if !output.status.success() {
            return Err(PingError::NoReply);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_reply_time(&stdout)
            .map(|ms| Duration::from_secs_f64(ms / 1000.0))
            .ok_or_else(|| PingError::Malformed("no reply time in ping output".to_string()))
    }
}

/// Extract the reply time in milliseconds from `ping` output.
///
/// Accepts `time=1.23 ms`, `time=1.23ms` and `time<1 ms`.
pub fn parse_reply_time(output: &str) -> Option<f64> {
    output.lines().find_map(|line| {
        let start = line.find("time=").or_else(|| line.find("time<"))? + "time=".len();
        let value = line[start..].split_whitespace().next()?;
        value.trim_end_matches("ms").parse::<f64>().ok()
    })
}

async fn resolve(target: &str) -> Result<IpAddr, PingError> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host((target, 0))
        .await
        .map_err(|e| PingError::Resolve(format!("{}: {}", target, e)))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| PingError::Resolve(format!("{}: no address found", target)))
}
