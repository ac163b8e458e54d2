use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{
    DISCOVERY_PORT, DISCOVERY_REQUEST, DISCOVERY_RESPONSE_PREFIX, INGESTION_PATH, INGESTION_PORT,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_discovery_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    #[serde(default = "default_request_token")]
    pub request_token: String,
    #[serde(default = "default_response_prefix")]
    pub response_prefix: String,
    /// Total bind attempts while the port is held by someone else
    #[serde(default = "default_bind_attempts")]
    pub bind_attempts: u32,
    #[serde(default = "default_bind_retry_delay")]
    pub bind_retry_delay_secs: u64,
    /// Receive timeout; bounds how long shutdown waits on the socket
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_enabled")]
    pub reuse_address: bool,
    /// Advertise these addresses instead of resolving the host name
    #[serde(default)]
    pub advertise_addresses: Option<Vec<IpAddr>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_ingestion_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_ingestion_port")]
    pub port: u16,
    #[serde(default = "default_ingestion_path")]
    pub path: String,
    /// Reply with HTTP 500 for error records instead of always 200.
    /// The body's `code` field is authoritative either way.
    #[serde(default)]
    pub mirror_status_code: bool,
}

/// Daily scan log, `<dir>/<file_prefix>.YYYY-MM-DD.log`
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_enabled")]
    pub file: bool,
    /// Relative paths are resolved against the executable's directory
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
}

fn default_enabled() -> bool {
    true
}

fn default_discovery_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_discovery_port() -> u16 {
    DISCOVERY_PORT
}

fn default_request_token() -> String {
    DISCOVERY_REQUEST.to_string()
}

fn default_response_prefix() -> String {
    DISCOVERY_RESPONSE_PREFIX.to_string()
}

fn default_bind_attempts() -> u32 {
    3
}

fn default_bind_retry_delay() -> u64 {
    5
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_ingestion_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_ingestion_port() -> u16 {
    INGESTION_PORT
}

fn default_ingestion_path() -> String {
    INGESTION_PATH.to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("log")
}

fn default_log_prefix() -> String {
    "qrdata".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bind: default_discovery_bind(),
            port: default_discovery_port(),
            request_token: default_request_token(),
            response_prefix: default_response_prefix(),
            bind_attempts: default_bind_attempts(),
            bind_retry_delay_secs: default_bind_retry_delay(),
            poll_interval_ms: default_poll_interval(),
            reuse_address: default_enabled(),
            advertise_addresses: None,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            bind: default_ingestion_bind(),
            port: default_ingestion_port(),
            path: default_ingestion_path(),
            mirror_status_code: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_enabled(),
            dir: default_log_dir(),
            file_prefix: default_log_prefix(),
        }
    }
}

impl DiscoveryConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn bind_retry_delay(&self) -> Duration {
        Duration::from_secs(self.bind_retry_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl IngestionConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Route path, always with a leading slash
    pub fn route_path(&self) -> String {
        format!("/{}", self.path.trim_start_matches('/'))
    }
}

impl LoggingConfig {
    /// Log directory, anchored next to the executable when relative
    pub fn resolved_dir(&self) -> PathBuf {
        if self.dir.is_absolute() {
            return self.dir.clone();
        }
        let base = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join(&self.dir)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        anyhow::ensure!(config.discovery.bind_attempts > 0, "discovery.bind_attempts must be at least 1");
        anyhow::ensure!(config.discovery.poll_interval_ms > 0, "discovery.poll_interval_ms must be positive");
        anyhow::ensure!(!config.discovery.request_token.is_empty(), "discovery.request_token must not be empty");
        anyhow::ensure!(!config.logging.file_prefix.is_empty(), "logging.file_prefix must not be empty");
        Ok(config)
    }
}
