//! Internet throughput probe.
//!
//! Picks the lowest-latency server offered by the speedtest.net server list,
//! then measures download and upload throughput against it, one after the
//! other.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info};
use url::Url;

use super::checker::Probe;
use super::types::{CheckResult, CheckType, UNKNOWN_TARGET};

const SERVER_LIST_URL: &str =
    "https://www.speedtest.net/api/js/servers?engine=js&limit=10&https_functional=true";

/// Servers whose latency is sampled before picking the best one
const SERVER_CANDIDATES: usize = 5;

const LATENCY_SAMPLES: usize = 3;

/// Edge lengths of the `random{n}x{n}.jpg` images fetched for download
const DOWNLOAD_SIZES: [u32; 4] = [350, 750, 1500, 2000];

/// Upload payload, posted `UPLOAD_ROUNDS` times
const UPLOAD_CHUNK_BYTES: usize = 1024 * 1024;
const UPLOAD_ROUNDS: usize = 4;

#[derive(Debug, Error)]
pub enum SpeedTestError {
    /// Client setup or server hint problems
    #[error("speed test configuration error: {0}")]
    Config(String),
    /// The server list could not be fetched or offered no usable server
    #[error("speed test server list error: {0}")]
    ServerList(String),
    #[error("speed test error: {0}")]
    Transfer(String),
    #[error("speed test error: timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// A measurement server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpeedServer {
    /// Upload endpoint, other resources live next to it
    pub url: String,
    pub host: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sponsor: String,
    #[serde(default)]
    pub distance: Option<f64>,
}

impl SpeedServer {
    /// Build a server from a user supplied URL
    pub fn from_hint(hint: &str) -> Result<Self, SpeedTestError> {
        let url = Url::parse(hint)
            .map_err(|e| SpeedTestError::Config(format!("invalid server URL {}: {}", hint, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| SpeedTestError::Config(format!("server URL {} has no host", hint)))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self {
            url: url.to_string(),
            host,
            name: String::new(),
            sponsor: String::new(),
            distance: None,
        })
    }

    fn resource(&self, path: &str) -> Result<Url, SpeedTestError> {
        Url::parse(&self.url)
            .and_then(|base| base.join(path))
            .map_err(|e| SpeedTestError::Transfer(format!("bad server URL {}: {}", self.url, e)))
    }
}

/// Network side of a speed test
#[async_trait::async_trait]
pub trait SpeedTestBackend: Send + Sync {
    /// Candidate servers, nearest first
    async fn servers(&self) -> Result<Vec<SpeedServer>, SpeedTestError>;

    /// Round trip latency to the server in milliseconds
    async fn latency(&self, server: &SpeedServer) -> Result<f64, SpeedTestError>;

    /// Download throughput in bits per second
    async fn download(&self, server: &SpeedServer) -> Result<f64, SpeedTestError>;

    /// Upload throughput in bits per second
    async fn upload(&self, server: &SpeedServer) -> Result<f64, SpeedTestError>;
}

/// Convert bits per second to megabits per second, two decimals
pub fn bps_to_mbps(bps: f64) -> f64 {
    (bps / 1_000_000.0 * 100.0).round() / 100.0
}

/// Outcome of a successful speed test
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedMeasurement {
    pub server: SpeedServer,
    pub latency_ms: f64,
    pub download_bps: f64,
    pub upload_bps: f64,
}

pub struct SpeedProbe {
    backend: Arc<dyn SpeedTestBackend>,
    server_hint: Option<String>,
    timeout: Duration,
}

impl SpeedProbe {
    pub fn new(
        backend: Arc<dyn SpeedTestBackend>,
        server_hint: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self { backend, server_hint, timeout }
    }

    /// Run a full speed test. Failures of any stage come back as an
    /// unreachable result whose message names the failing stage.
    pub async fn probe_speed(&self) -> CheckResult {
        let result = CheckResult::new(CheckType::SpeedTest, UNKNOWN_TARGET);
        info!("Starting speed test");

        let measured = match timeout(self.timeout, self.measure()).await {
            Ok(measured) => measured,
            Err(_) => Err(SpeedTestError::Timeout(self.timeout)),
        };

        match measured {
            Ok(m) => {
                let download_mbps = bps_to_mbps(m.download_bps);
                let upload_mbps = bps_to_mbps(m.upload_bps);
                info!(
                    "Speed test finished: server={}, download={:.2}Mbps, upload={:.2}Mbps",
                    m.server.host, download_mbps, upload_mbps
                );

                let mut result = result.with_throughput(m.latency_ms, download_mbps, upload_mbps);
                result.target = m.server.host;
                result
            }
            Err(e) => {
                error!("{}", e);
                result.failure(e.to_string())
            }
        }
    }

    async fn measure(&self) -> Result<SpeedMeasurement, SpeedTestError> {
        let (server, latency_ms) = self.select_server().await?;
        info!("Selected server {} ({}), latency {:.2}ms", server.host, server.sponsor, latency_ms);

        info!("Measuring download speed...");
        let download_bps = self.backend.download(&server).await?;

        info!("Measuring upload speed...");
        let upload_bps = self.backend.upload(&server).await?;

        Ok(SpeedMeasurement { server, latency_ms, download_bps, upload_bps })
    }

    async fn select_server(&self) -> Result<(SpeedServer, f64), SpeedTestError> {
        if let Some(hint) = &self.server_hint {
            let server = SpeedServer::from_hint(hint)?;
            let latency = self.backend.latency(&server).await?;
            return Ok((server, latency));
        }

        let servers = self.backend.servers().await?;
        if servers.is_empty() {
            return Err(SpeedTestError::ServerList("server list is empty".to_string()));
        }

        let mut best: Option<(SpeedServer, f64)> = None;
        for server in servers.into_iter().take(SERVER_CANDIDATES) {
            match self.backend.latency(&server).await {
                Ok(latency) => {
                    debug!("Server {} latency {:.2}ms", server.host, latency);
                    if best.as_ref().is_none_or(|(_, best_latency)| latency < *best_latency) {
                        best = Some((server, latency));
                    }
                }
                Err(e) => debug!("Skipping server {}: {}", server.host, e),
            }
        }

        best.ok_or_else(|| SpeedTestError::ServerList("no server answered a latency check".into()))
    }
}

#[async_trait::async_trait]
impl Probe for SpeedProbe {
    fn check_type(&self) -> CheckType {
        CheckType::SpeedTest
    }

    async fn probe(&self) -> CheckResult {
        self.probe_speed().await
    }
}

/// speedtest.net protocol over HTTP
pub struct HttpSpeedBackend {
    client: reqwest::Client,
}

impl HttpSpeedBackend {
    pub fn new(timeout_seconds: u64) -> Result<Self, SpeedTestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(concat!("netcheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SpeedTestError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn fetch_len(&self, url: Url) -> Result<usize, SpeedTestError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SpeedTestError::Transfer(format!("request failed: {}", e)))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| SpeedTestError::Transfer(format!("transfer interrupted: {}", e)))?;
        Ok(body.len())
    }
}

fn bits_per_second(bytes: usize, elapsed: Duration) -> Result<f64, SpeedTestError> {
    let seconds = elapsed.as_secs_f64();
    if bytes == 0 || seconds <= 0.0 {
        return Err(SpeedTestError::Transfer("no data transferred".to_string()));
    }
    Ok(bytes as f64 * 8.0 / seconds)
}

#[async_trait::async_trait]
impl SpeedTestBackend for HttpSpeedBackend {
    async fn servers(&self) -> Result<Vec<SpeedServer>, SpeedTestError> {
        let response = self
            .client
            .get(SERVER_LIST_URL)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SpeedTestError::ServerList(e.to_string()))?;

        let mut servers: Vec<SpeedServer> = response
            .json()
            .await
            .map_err(|e| SpeedTestError::ServerList(format!("unreadable server list: {}", e)))?;

        servers.sort_by(|a, b| {
            a.distance
                .unwrap_or(f64::MAX)
                .partial_cmp(&b.distance.unwrap_or(f64::MAX))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(servers)
    }

    async fn latency(&self, server: &SpeedServer) -> Result<f64, SpeedTestError> {
        let url = server.resource("latency.txt")?;
        let mut total = 0.0;
        for _ in 0..LATENCY_SAMPLES {
            let start = Instant::now();
            self.fetch_len(url.clone()).await?;
            total += start.elapsed().as_secs_f64() * 1000.0;
        }
        Ok(total / LATENCY_SAMPLES as f64)
    }

    async fn download(&self, server: &SpeedServer) -> Result<f64, SpeedTestError> {
        let start = Instant::now();
        let mut bytes = 0;
        for size in DOWNLOAD_SIZES {
            bytes += self.fetch_len(server.resource(&format!("random{size}x{size}.jpg"))?).await?;
        }
        bits_per_second(bytes, start.elapsed())
    }

    async fn upload(&self, server: &SpeedServer) -> Result<f64, SpeedTestError> {
        let url = Url::parse(&server.url)
            .map_err(|e| SpeedTestError::Transfer(format!("bad server URL {}: {}", server.url, e)))?;

        let mut payload = b"content1=".to_vec();
        payload.resize(UPLOAD_CHUNK_BYTES, b'0');

        let start = Instant::now();
        let mut bytes = 0;
        for _ in 0..UPLOAD_ROUNDS {
            self.client
                .post(url.clone())
                .body(payload.clone())
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| SpeedTestError::Transfer(format!("upload failed: {}", e)))?;
            bytes += payload.len();
        }
        bits_per_second(bytes, start.elapsed())
    }
}
