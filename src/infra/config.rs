//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::types::FloorId;
use crate::services::billing::RateTable;
use crate::services::floor_registry::SlotMode;
use crate::services::session_store::RetentionPolicy;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/dev.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Facility identifier, attached to archived sessions and metrics
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "parking".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct FloorConfig {
    pub id: u32,
    pub capacity: u32,
}

fn default_floors() -> Vec<FloorConfig> {
    [(1, 250), (2, 250), (3, 220), (4, 200)]
        .into_iter()
        .map(|(id, capacity)| FloorConfig { id, capacity })
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RatesConfig {
    #[serde(default = "default_car_rate")]
    pub car: u64,
    #[serde(default = "default_motorcycle_rate")]
    pub motorcycle: u64,
    #[serde(default = "default_bicycle_rate")]
    pub bicycle: u64,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            car: default_car_rate(),
            motorcycle: default_motorcycle_rate(),
            bicycle: default_bicycle_rate(),
        }
    }
}

fn default_car_rate() -> u64 {
    10_000
}

fn default_motorcycle_rate() -> u64 {
    5_000
}

fn default_bicycle_rate() -> u64 {
    2_000
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AllocationConfig {
    #[serde(default)]
    pub slot_mode: SlotMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Closed sessions kept in memory before eviction
    #[serde(default = "default_max_closed_sessions")]
    pub max_closed_sessions: usize,
    /// Closed sessions older than this are evicted (seconds)
    #[serde(default = "default_closed_ttl_secs")]
    pub closed_ttl_secs: u64,
    /// Evicted sessions are appended here (JSONL format)
    #[serde(default = "default_archive_file")]
    pub archive_file: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_closed_sessions: default_max_closed_sessions(),
            closed_ttl_secs: default_closed_ttl_secs(),
            archive_file: default_archive_file(),
        }
    }
}

fn default_max_closed_sessions() -> usize {
    10_000
}

fn default_closed_ttl_secs() -> u64 {
    86_400
}

fn default_archive_file() -> String {
    "sessions.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_notify_url")]
    pub url: String,
    #[serde(default = "default_notify_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_notify_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_notify_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_notify_queue_size")]
    pub queue_size: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_notify_url(),
            timeout_ms: default_notify_timeout_ms(),
            max_retries: default_notify_max_retries(),
            retry_backoff_ms: default_notify_retry_backoff_ms(),
            queue_size: default_notify_queue_size(),
        }
    }
}

fn default_notify_url() -> String {
    "http://localhost:8080/api/camera".to_string()
}

fn default_notify_timeout_ms() -> u64 {
    2000
}

fn default_notify_max_retries() -> u32 {
    3
}

fn default_notify_retry_backoff_ms() -> u64 {
    500
}

fn default_notify_queue_size() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionConfig {
    #[serde(default = "default_recognition_url")]
    pub url: String,
    #[serde(default = "default_recognition_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self { url: default_recognition_url(), timeout_ms: default_recognition_timeout_ms() }
    }
}

fn default_recognition_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_recognition_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct LanesConfig {
    /// Enable the lane TCP listener
    #[serde(default = "default_lane_listener_enabled")]
    pub listener_enabled: bool,
    #[serde(default = "default_lane_listener_port")]
    pub listener_port: u16,
}

impl Default for LanesConfig {
    fn default() -> Self {
        Self {
            listener_enabled: default_lane_listener_enabled(),
            listener_port: default_lane_listener_port(),
        }
    }
}

fn default_lane_listener_enabled() -> bool {
    true
}

fn default_lane_listener_port() -> u16 {
    25900
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default = "default_floors")]
    pub floors: Vec<FloorConfig>,
    #[serde(default)]
    pub rates: RatesConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub lanes: LanesConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    floors: Vec<(FloorId, u32)>,
    rates: RateTable,
    slot_mode: SlotMode,
    max_closed_sessions: usize,
    closed_ttl_secs: u64,
    archive_file: String,
    notify_enabled: bool,
    notify_url: String,
    notify_timeout_ms: u64,
    notify_max_retries: u32,
    notify_retry_backoff_ms: u64,
    notify_queue_size: usize,
    recognition_url: String,
    recognition_timeout_ms: u64,
    lane_listener_enabled: bool,
    lane_listener_port: u16,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        let toml_config = TomlConfig {
            site: SiteConfig::default(),
            floors: default_floors(),
            rates: RatesConfig::default(),
            allocation: AllocationConfig::default(),
            retention: RetentionConfig::default(),
            notify: NotifyConfig::default(),
            recognition: RecognitionConfig::default(),
            lanes: LanesConfig::default(),
            metrics: MetricsConfig::default(),
        };
        Self::from_toml(toml_config, "default")
    }
}

impl Config {
    /// Determine config file path: explicit argument, then CONFIG_FILE, then the default
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        DEFAULT_CONFIG_PATH.to_string()
    }

    fn from_toml(toml_config: TomlConfig, source: &str) -> Self {
        Self {
            site_id: toml_config.site.id,
            floors: toml_config.floors.iter().map(|f| (FloorId(f.id), f.capacity)).collect(),
            rates: RateTable {
                car: toml_config.rates.car,
                motorcycle: toml_config.rates.motorcycle,
                bicycle: toml_config.rates.bicycle,
            },
            slot_mode: toml_config.allocation.slot_mode,
            max_closed_sessions: toml_config.retention.max_closed_sessions,
            closed_ttl_secs: toml_config.retention.closed_ttl_secs,
            archive_file: toml_config.retention.archive_file,
            notify_enabled: toml_config.notify.enabled,
            notify_url: toml_config.notify.url,
            notify_timeout_ms: toml_config.notify.timeout_ms,
            notify_max_retries: toml_config.notify.max_retries,
            notify_retry_backoff_ms: toml_config.notify.retry_backoff_ms,
            notify_queue_size: toml_config.notify.queue_size,
            recognition_url: toml_config.recognition.url,
            recognition_timeout_ms: toml_config.recognition.timeout_ms,
            lane_listener_enabled: toml_config.lanes.listener_enabled,
            lane_listener_port: toml_config.lanes.listener_port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: source.to_string(),
        }
    }

    fn validate(toml_config: &TomlConfig) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for floor in &toml_config.floors {
            if floor.id == 0 {
                bail!("floor ids start at 1");
            }
            if !seen.insert(floor.id) {
                bail!("duplicate floor id {}", floor.id);
            }
        }

        let rates = &toml_config.rates;
        if rates.car == 0 || rates.motorcycle == 0 || rates.bicycle == 0 {
            bail!("hourly rates must be positive");
        }

        if toml_config.notify.queue_size == 0 {
            bail!("notify.queue_size must be positive");
        }
        if toml_config.metrics.interval_secs == 0 {
            bail!("metrics.interval_secs must be positive");
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Self::validate(&toml_config)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_fallback_to_defaults");
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Floors as `(id, capacity)` pairs in file order
    pub fn floors(&self) -> &[(FloorId, u32)] {
        &self.floors
    }

    /// Sum of all configured floor capacities
    pub fn total_capacity(&self) -> u64 {
        self.floors.iter().map(|&(_, c)| u64::from(c)).sum()
    }

    pub fn rates(&self) -> RateTable {
        self.rates
    }

    pub fn slot_mode(&self) -> SlotMode {
        self.slot_mode
    }

    pub fn retention(&self) -> RetentionPolicy {
        // Clamp so absurd values cannot overflow chrono's range
        let ttl_secs = self.closed_ttl_secs.min(u64::from(u32::MAX)) as i64;
        RetentionPolicy {
            max_closed: self.max_closed_sessions,
            ttl: chrono::Duration::seconds(ttl_secs),
        }
    }

    pub fn closed_ttl_secs(&self) -> u64 {
        self.closed_ttl_secs
    }

    pub fn archive_file(&self) -> &str {
        &self.archive_file
    }

    pub fn notify_enabled(&self) -> bool {
        self.notify_enabled
    }

    pub fn notify_url(&self) -> &str {
        &self.notify_url
    }

    pub fn notify_timeout_ms(&self) -> u64 {
        self.notify_timeout_ms
    }

    pub fn notify_max_retries(&self) -> u32 {
        self.notify_max_retries
    }

    pub fn notify_retry_backoff_ms(&self) -> u64 {
        self.notify_retry_backoff_ms
    }

    pub fn notify_queue_size(&self) -> usize {
        self.notify_queue_size
    }

    pub fn recognition_url(&self) -> &str {
        &self.recognition_url
    }

    pub fn recognition_timeout_ms(&self) -> u64 {
        self.recognition_timeout_ms
    }

    pub fn lane_listener_enabled(&self) -> bool {
        self.lane_listener_enabled
    }

    pub fn lane_listener_port(&self) -> u16 {
        self.lane_listener_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to override the floor layout
    #[cfg(test)]
    pub fn with_floors(mut self, floors: &[(u32, u32)]) -> Self {
        self.floors = floors.iter().map(|&(id, cap)| (FloorId(id), cap)).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "parking");
        assert_eq!(
            config.floors(),
            &[(FloorId(1), 250), (FloorId(2), 250), (FloorId(3), 220), (FloorId(4), 200)]
        );
        assert_eq!(config.total_capacity(), 920);
        assert_eq!(config.rates(), RateTable::default());
        assert_eq!(config.slot_mode(), SlotMode::Sequential);
        assert!(!config.notify_enabled());
        assert_eq!(config.lane_listener_port(), 25900);
        assert_eq!(config.metrics_interval_secs(), 10);
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        assert_eq!(Config::resolve_config_path(Some("config/site-a.toml")), "config/site-a.toml");
    }

    #[test]
    fn test_retention_policy() {
        let retention = Config::default().retention();
        assert_eq!(retention.max_closed, 10_000);
        assert_eq!(retention.ttl, chrono::Duration::hours(24));
    }

    #[test]
    fn test_validate_rejects_duplicate_floor() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[[floors]]
id = 1
capacity = 10

[[floors]]
id = 1
capacity = 20
"#,
        )
        .unwrap();
        assert!(Config::validate(&toml_config).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let toml_config: TomlConfig = toml::from_str("[rates]\ncar = 0\n").unwrap();
        assert!(Config::validate(&toml_config).is_err());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let toml_config: TomlConfig = toml::from_str("").unwrap();
        assert!(Config::validate(&toml_config).is_ok());
        let config = Config::from_toml(toml_config, "empty");
        assert_eq!(config.floors().len(), 4);
        assert_eq!(config.archive_file(), "sessions.jsonl");
    }

    #[test]
    fn test_with_floors_builder() {
        let config = Config::default().with_floors(&[(7, 3)]);
        assert_eq!(config.floors(), &[(FloorId(7), 3)]);
        assert_eq!(config.total_capacity(), 3);
    }
}
