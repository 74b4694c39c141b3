use std::{env, fmt, fs, path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::ping::PingTransport;
use crate::monitoring::validation;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Immutable service configuration, built once at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub probe: ProbeConfig,
    pub schedule: ScheduleConfig,
    pub sink: SinkConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub router_target: String,
    pub ping_count: u32,
    pub ping_timeout_seconds: u64,
    pub ping_transport: PingTransport,
    /// Fixed speed test server URL instead of picking the nearest one
    pub speed_server: Option<String>,
    pub speed_timeout_seconds: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            router_target: "192.168.0.1".into(),
            ping_count: 4,
            ping_timeout_seconds: 5,
            ping_transport: PingTransport::Icmp,
            speed_server: None,
            speed_timeout_seconds: 60,
        }
    }
}

impl ProbeConfig {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_seconds)
    }

    pub fn speed_timeout(&self) -> Duration {
        Duration::from_secs(self.speed_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { interval_minutes: 1 }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    Disable,
    #[default]
    Require,
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(TlsMode::Disable),
            "require" => Ok(TlsMode::Require),
            other => Err(format!("unknown TLS mode: {}", other)),
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsMode::Disable => write!(f, "disable"),
            TlsMode::Require => write!(f, "require"),
        }
    }
}

/// Where check results are stored
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Remote libsql server host; empty means a local database file
    pub host: String,
    pub port: u16,
    /// Database name, or the file path when running locally
    pub database: String,
    pub user: String,
    /// Auth token for the remote server
    pub password: String,
    pub tls_mode: TlsMode,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8080,
            database: "network_checks.db".into(),
            user: "netcheck".into(),
            password: String::new(),
            tls_mode: TlsMode::Require,
        }
    }
}

impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("tls_mode", &self.tls_mode)
            .finish()
    }
}

/// Resolved storage location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    Local(path::PathBuf),
    Remote { url: String, auth_token: String },
}

impl SinkConfig {
    /// Local database file at `path`
    #[cfg(test)]
    pub fn local(path: impl AsRef<path::Path>) -> Self {
        Self { database: path.as_ref().to_string_lossy().into_owned(), ..Self::default() }
    }

    pub fn is_local(&self) -> bool {
        self.host.trim().is_empty()
    }

    pub fn target(&self) -> SinkTarget {
        if self.is_local() {
            return SinkTarget::Local(path::PathBuf::from(&self.database));
        }

        let scheme = match self.tls_mode {
            TlsMode::Require => "https",
            TlsMode::Disable => "http",
        };
        SinkTarget::Remote {
            url: format!("{}://{}:{}", scheme, self.host, self.port),
            auth_token: self.password.clone(),
        }
    }

    /// Human readable location, without secrets
    pub fn describe(&self) -> String {
        if self.is_local() {
            format!("local file {}", self.database)
        } else {
            format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: path::PathBuf,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { directory: path::PathBuf::from("."), file_name: "netcheck.log".into() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Parse an environment value, `None` when the variable is unset or blank
fn env_value<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name, value: raw }),
        _ => Ok(None),
    }
}

/// Boolean hint: only a case-insensitive `true` sets it, anything else is false
fn env_flag(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> bool {
    lookup(name).is_some_and(|raw| raw.trim().eq_ignore_ascii_case("true"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Configuration:")?;
        write_title_1(f, "Router Probe")?;
        write_1(f, "Target", &self.probe.router_target)?;
        write_1(f, "Ping Count", &self.probe.ping_count)?;
        write_1(f, "Ping Timeout (s)", &self.probe.ping_timeout_seconds)?;
        write_1(f, "Ping Transport", &self.probe.ping_transport)?;
        write_title_1(f, "Speed Probe")?;
        write_1(f, "Server", &self.probe.speed_server.as_deref().unwrap_or("nearest"))?;
        write_1(f, "Timeout (s)", &self.probe.speed_timeout_seconds)?;
        write_title_1(f, "Schedule")?;
        write_1(f, "Interval (min)", &self.schedule.interval_minutes)?;
        write_title_1(f, "Database")?;
        write_1(f, "Target", &self.sink.describe())?;
        write_1(f, "TLS Mode", &self.sink.tls_mode)?;
        write_1(f, "Password", &if self.sink.password.is_empty() { "<unset>" } else { "<set>" })?;
        write_title_1(f, "Logging")?;
        write_1(f, "File", &self.logging.directory.join(&self.logging.file_name).display())?;

        Ok(())
    }
}

impl Config {
    /// Build the configuration: defaults, then the optional TOML file, then
    /// environment variables (a `.env` file is loaded first when present).
    pub fn load(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = match optional_path {
            Some(path) => Self::from_file(path.as_ref())?,
            None => Self::default(),
        };
        config.apply_env(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML config file
    pub fn from_file(path: &path::Path) -> Result<Self, ConfigError> {
        let path = normalize_toml_path(path);
        let raw_string = fs::read_to_string(&path)
            .map_err(|source| ConfigError::ReadFailed { path: path.clone(), source })?;
        toml::from_str(&raw_string).map_err(|source| ConfigError::ParseFailed { path, source })
    }

    /// Override fields from environment variables
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = env_value::<String>(&lookup, "ROUTER_IP")? {
            self.probe.router_target = v;
        }
        if let Some(v) = env_value(&lookup, "PING_COUNT")? {
            self.probe.ping_count = v;
        }
        if let Some(v) = env_value(&lookup, "PING_TIMEOUT")? {
            self.probe.ping_timeout_seconds = v;
        }
        match env_value::<PingTransport>(&lookup, "PING_TRANSPORT")? {
            Some(transport) => self.probe.ping_transport = transport,
            None => {
                if env_flag(&lookup, "IS_RASPBERRY_PI") {
                    self.probe.ping_transport = PingTransport::System;
                }
            }
        }
        if let Some(v) = env_value(&lookup, "SPEEDTEST_SERVER")? {
            self.probe.speed_server = Some(v);
        }
        if let Some(v) = env_value(&lookup, "SPEEDTEST_TIMEOUT")? {
            self.probe.speed_timeout_seconds = v;
        }
        if let Some(v) = env_value(&lookup, "CHECK_INTERVAL_MINUTES")? {
            self.schedule.interval_minutes = v;
        }
        if let Some(v) = env_value(&lookup, "DB_HOST")? {
            self.sink.host = v;
        }
        if let Some(v) = env_value(&lookup, "DB_PORT")? {
            self.sink.port = v;
        }
        if let Some(v) = env_value(&lookup, "DB_NAME")? {
            self.sink.database = v;
        }
        if let Some(v) = env_value(&lookup, "DB_USER")? {
            self.sink.user = v;
        }
        if let Some(v) = env_value(&lookup, "DB_PASSWORD")? {
            self.sink.password = v;
        }
        if let Some(v) = env_value(&lookup, "DB_SSLMODE")? {
            self.sink.tls_mode = v;
        }
        if let Some(v) = env_value(&lookup, "LOG_DIR")? {
            self.logging.directory = v;
        }
        if let Some(v) = env_value(&lookup, "LOG_FILE")? {
            self.logging.file_name = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |e: anyhow::Error| ConfigError::Invalid(e.to_string());

        validation::validate_router_target(&self.probe.router_target).map_err(invalid)?;
        validation::validate_ping_count(self.probe.ping_count).map_err(invalid)?;
        validation::validate_timeout("Ping timeout", self.probe.ping_timeout_seconds, 60)
            .map_err(invalid)?;
        validation::validate_timeout("Speed test timeout", self.probe.speed_timeout_seconds, 300)
            .map_err(invalid)?;
        validation::validate_check_interval(self.schedule.interval_minutes).map_err(invalid)?;

        if self.sink.database.trim().is_empty() {
            return Err(ConfigError::Invalid("Database name must not be empty".into()));
        }
        Ok(())
    }
}
