//! Configuration system for Pulse.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PULSE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/pulse/config.toml
//!   3. ~/.config/pulse/config.toml

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detection::ChangeDetection;
use crate::identity::{random_hex, Identity};
use crate::locator::{EndpointMetadata, Locator, LocatorParseError};
use crate::wire::{HEARTBEAT_PORT, MULTICAST_ADDR};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub detector: DetectorSettings,
    pub endpoints: Vec<EndpointConfig>,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Domain this process belongs to.
    pub domain: String,
    /// Instance name. Empty = random per start.
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network interface for heartbeat multicast. Empty = "lo".
    pub interface: String,
    /// IPv6 multicast group heartbeats are sent to.
    pub multicast_addr: String,
    /// UDP port heartbeats are sent to and received on.
    pub port: u16,
}

/// Detector options as written in the config file.
///
/// Unvalidated; `to_detector_config()` applies the interval constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub heartbeat_interval_ms: u64,
    pub stale_after_ms: u64,
    /// Domains whose heartbeats are accepted. Empty = the local domain.
    pub domains: Vec<String>,
    /// Accept heartbeats that originate from this very process.
    pub accept_local: bool,
    /// Per-locator timeout used when re-verifying a stale peer.
    pub probe_timeout_ms: u64,
    pub change_detection: ChangeDetection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Locator URI, e.g. "socket://10.0.0.5:4446".
    pub locator: String,
    #[serde(default)]
    pub subsystems: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Port for the local HTTP API. Bound on 127.0.0.1.
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_millis(5000);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(2000);
pub const DEFAULT_API_PORT: u16 = 9401;

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            domain: "default".to_string(),
            instance_id: String::new(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            multicast_addr: MULTICAST_ADDR.to_string(),
            port: HEARTBEAT_PORT,
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64,
            stale_after_ms: DEFAULT_STALE_AFTER.as_millis() as u64,
            domains: Vec::new(),
            accept_local: false,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
            change_detection: ChangeDetection::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_API_PORT,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("pulse")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("heartbeat interval must be greater than zero")]
    ZeroHeartbeatInterval,
    #[error("heartbeat interval {heartbeat:?} must be shorter than stale-after {stale_after:?}")]
    HeartbeatNotBelowStale {
        heartbeat: Duration,
        stale_after: Duration,
    },
    #[error("probe timeout must be greater than zero")]
    ZeroProbeTimeout,
    #[error("invalid endpoint locator: {0}")]
    InvalidEndpoint(#[from] LocatorParseError),
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PulseConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load a config file without env overrides. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(PulseConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PULSE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text =
            toml::to_string_pretty(&PulseConfig::default()).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply PULSE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PULSE_IDENTITY__DOMAIN") {
            self.identity.domain = v;
        }
        if let Ok(v) = std::env::var("PULSE_IDENTITY__INSTANCE_ID") {
            self.identity.instance_id = v;
        }
        if let Ok(v) = std::env::var("PULSE_NETWORK__INTERFACE") {
            self.network.interface = v;
        }
        if let Ok(v) = std::env::var("PULSE_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Ok(v) = std::env::var("PULSE_DETECTOR__HEARTBEAT_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                self.detector.heartbeat_interval_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("PULSE_DETECTOR__STALE_AFTER_MS") {
            if let Ok(ms) = v.parse() {
                self.detector.stale_after_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("PULSE_DETECTOR__ACCEPT_LOCAL") {
            self.detector.accept_local = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("PULSE_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
            }
        }
    }

    /// The identity this process runs under.
    pub fn local_identity(&self) -> Identity {
        let domain = Some(self.identity.domain.as_str()).filter(|d| !d.is_empty());
        let instance_id = if self.identity.instance_id.is_empty() {
            random_hex(8)
        } else {
            self.identity.instance_id.clone()
        };
        Identity::local(domain, instance_id)
    }

    /// Parse the advertised endpoints.
    pub fn local_endpoints(&self) -> Result<Vec<EndpointMetadata>, ConfigError> {
        self.endpoints
            .iter()
            .map(|e| {
                let locator: Locator = e.locator.parse()?;
                Ok(EndpointMetadata::new(locator, e.subsystems.iter().cloned()))
            })
            .collect()
    }
}

impl DetectorSettings {
    /// Validate into a detector configuration.
    pub fn to_detector_config(&self) -> Result<DetectorConfig, ConfigError> {
        let mut config = DetectorConfig::new(
            Duration::from_millis(self.heartbeat_interval_ms),
            Duration::from_millis(self.stale_after_ms),
        )?;
        config.set_probe_timeout(Duration::from_millis(self.probe_timeout_ms))?;
        config.set_domains(self.domains.iter().cloned());
        config.set_accept_local(self.accept_local);
        config.set_change_detection(self.change_detection);
        Ok(config)
    }
}

// ── Validated detector configuration ──────────────────────────────────────────

/// Detector configuration.
///
/// `heartbeat_interval < stale_after` holds for every value of this type.
/// A setter that would break it returns an error and changes nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorConfig {
    heartbeat_interval: Duration,
    stale_after: Duration,
    domains: BTreeSet<String>,
    accept_local: bool,
    probe_timeout: Duration,
    change_detection: ChangeDetection,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
            domains: BTreeSet::new(),
            accept_local: false,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            change_detection: ChangeDetection::default(),
        }
    }
}

impl DetectorConfig {
    pub fn new(heartbeat_interval: Duration, stale_after: Duration) -> Result<Self, ConfigError> {
        check_intervals(heartbeat_interval, stale_after)?;
        Ok(Self {
            heartbeat_interval,
            stale_after,
            ..Self::default()
        })
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn domains(&self) -> &BTreeSet<String> {
        &self.domains
    }

    pub fn accept_local(&self) -> bool {
        self.accept_local
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    pub fn change_detection(&self) -> ChangeDetection {
        self.change_detection
    }

    pub fn set_heartbeat_interval(&mut self, interval: Duration) -> Result<(), ConfigError> {
        check_intervals(interval, self.stale_after)?;
        self.heartbeat_interval = interval;
        Ok(())
    }

    pub fn set_stale_after(&mut self, stale_after: Duration) -> Result<(), ConfigError> {
        check_intervals(self.heartbeat_interval, stale_after)?;
        self.stale_after = stale_after;
        Ok(())
    }

    pub fn set_probe_timeout(&mut self, timeout: Duration) -> Result<(), ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::ZeroProbeTimeout);
        }
        self.probe_timeout = timeout;
        Ok(())
    }

    pub fn set_domains<I, S>(&mut self, domains: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = domains.into_iter().map(Into::into).collect();
    }

    pub fn set_accept_local(&mut self, accept_local: bool) {
        self.accept_local = accept_local;
    }

    pub fn set_change_detection(&mut self, mode: ChangeDetection) {
        self.change_detection = mode;
    }

    /// Builder-style `set_domains`.
    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_domains(domains);
        self
    }

    pub fn with_accept_local(mut self, accept_local: bool) -> Self {
        self.accept_local = accept_local;
        self
    }
}

fn check_intervals(heartbeat: Duration, stale_after: Duration) -> Result<(), ConfigError> {
    if heartbeat.is_zero() {
        return Err(ConfigError::ZeroHeartbeatInterval);
    }
    if heartbeat >= stale_after {
        return Err(ConfigError::HeartbeatNotBelowStale {
            heartbeat,
            stale_after,
        });
    }
    Ok(())
}
