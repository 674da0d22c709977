//! Plane Configuration - every control-plane tunable as an operator-editable TOML value
//!
//! Each section implements `Default` with the values from [`super::defaults`],
//! so an empty or partial file behaves exactly like the documented defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::defaults;
use crate::types::ServiceDescriptor;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a control-plane deployment.
///
/// Load with `PlaneConfig::load()` which searches:
/// 1. `$PLANE_CONFIG` env var
/// 2. `./plane_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaneConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub healing: HealingConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Services registered at boot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceDescriptor>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error ({0}): {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("config parse error ({0}): {1}")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

impl PlaneConfig {
    /// Load configuration using the standard search order, apply env
    /// overrides, then validate the result.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_file_or_default().with_env_overrides()
    }

    fn load_file_or_default() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var("PLANE_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), services = config.services.len(), "Loaded plane config from PLANE_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from PLANE_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "PLANE_CONFIG points to non-existent file, falling back");
            }
        }

        // 2. Check ./plane_config.toml
        let local = PathBuf::from("plane_config.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(services = config.services.len(), "Loaded plane config from ./plane_config.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./plane_config.toml, using defaults");
                }
            }
        }

        // 3. Defaults
        info!("No plane_config.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        for w in super::validation::validate_unknown_keys(&contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply `PLANE_*` environment overrides on top of the loaded file and
    /// validate again, since an override can break a valid file.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Same as [`with_env_overrides`](Self::with_env_overrides) with an injectable lookup.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.apply_overrides_from(lookup);
        self.validate()?;
        Ok(self)
    }

    /// Unparseable values are logged and ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("PLANE_SERVER_ADDR") {
            self.server.addr = addr;
        }
        override_num(&lookup, "PLANE_PROBE_INTERVAL_MS", &mut self.probe.interval_ms);
        override_num(&lookup, "PLANE_PROBE_TIMEOUT_MS", &mut self.probe.timeout_ms);
        override_num(&lookup, "PLANE_PROBE_FAILURE_THRESHOLD", &mut self.probe.failure_threshold);
        override_num(&lookup, "PLANE_BREAKER_THRESHOLD", &mut self.breaker.failure_threshold);
        override_num(&lookup, "PLANE_BREAKER_COOLDOWN_MS", &mut self.breaker.cooldown_ms);
        override_num(&lookup, "PLANE_HEALING_TICK_MS", &mut self.healing.tick_ms);
        override_num(&lookup, "PLANE_MAX_RESTARTS_PER_WINDOW", &mut self.healing.max_restarts_per_window);
        override_num(&lookup, "PLANE_RESTART_WINDOW_MS", &mut self.healing.restart_window_ms);
        override_num(&lookup, "PLANE_GRACE_PERIOD_MS", &mut self.healing.grace_period_ms);
        override_num(&lookup, "PLANE_RESTART_TIMEOUT_MS", &mut self.healing.restart_timeout_ms);
        override_num(&lookup, "PLANE_HEALING_LOG_CAP", &mut self.healing.log_capacity);
        override_num(&lookup, "PLANE_BUS_HISTORY", &mut self.bus.history_capacity);
        override_num(&lookup, "PLANE_HANDLER_TIMEOUT_MS", &mut self.bus.handler_timeout_ms);
        override_num(&lookup, "PLANE_ANALYTICS_MAX_ENTRIES", &mut self.analytics.max_entries);
    }

    /// Validate all values for internal consistency.
    ///
    /// Rules:
    /// - Capacities, thresholds and intervals must be > 0
    /// - The post-restart grace period must cover at least one re-probe
    /// - Descriptor ids must be non-empty and unique
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        Self::check_positive(self.probe.interval_ms, "probe.interval_ms", &mut errors);
        Self::check_positive(self.probe.timeout_ms, "probe.timeout_ms", &mut errors);
        Self::check_positive(u64::from(self.probe.failure_threshold), "probe.failure_threshold", &mut errors);
        Self::check_positive(u64::from(self.breaker.failure_threshold), "breaker.failure_threshold", &mut errors);
        Self::check_positive(self.healing.tick_ms, "healing.tick_ms", &mut errors);
        Self::check_positive(self.healing.restart_window_ms, "healing.restart_window_ms", &mut errors);
        Self::check_positive(self.healing.reprobe_interval_ms, "healing.reprobe_interval_ms", &mut errors);
        Self::check_positive(self.healing.restart_timeout_ms, "healing.restart_timeout_ms", &mut errors);
        Self::check_positive(u64::from(self.healing.attempts_per_episode), "healing.attempts_per_episode", &mut errors);
        Self::check_positive(self.healing.log_capacity as u64, "healing.log_capacity", &mut errors);
        Self::check_positive(self.bus.history_capacity as u64, "bus.history_capacity", &mut errors);
        Self::check_positive(self.bus.handler_timeout_ms, "bus.handler_timeout_ms", &mut errors);
        Self::check_positive(self.analytics.max_entries as u64, "analytics.max_entries", &mut errors);

        if self.healing.grace_period_ms < self.healing.reprobe_interval_ms {
            errors.push(format!(
                "healing.grace_period_ms ({}) must be >= healing.reprobe_interval_ms ({})",
                self.healing.grace_period_ms, self.healing.reprobe_interval_ms
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for svc in &self.services {
            if svc.id.trim().is_empty() {
                errors.push("services: descriptor with empty id".to_string());
            } else if !seen.insert(svc.id.as_str()) {
                errors.push(format!("services: duplicate id '{}'", svc.id));
            }
            if svc.probe_interval_ms == Some(0) {
                errors.push(format!("services.{}: probeIntervalMs must be > 0", svc.id));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_positive(value: u64, name: &str, errors: &mut Vec<String>) {
        if value == 0 {
            errors.push(format!("{name} must be > 0"));
        }
    }
}

fn override_num<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(v) => *target = v,
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable config override"),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Can be overridden by `PLANE_SERVER_ADDR` env var or `--addr` CLI flag.
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

/// Liveness probing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Interval for descriptors that do not declare their own.
    #[serde(default = "default_probe_interval")]
    pub interval_ms: u64,

    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,

    /// Consecutive failures before `Failed`.
    #[serde(default = "default_probe_threshold")]
    pub failure_threshold: u32,
}

fn default_probe_interval() -> u64 {
    defaults::PROBE_INTERVAL_MS
}

fn default_probe_timeout() -> u64 {
    defaults::PROBE_TIMEOUT_MS
}

fn default_probe_threshold() -> u32 {
    defaults::PROBE_FAILURE_THRESHOLD
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_probe_interval(),
            timeout_ms: default_probe_timeout(),
            failure_threshold: default_probe_threshold(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Default circuit-breaker policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_breaker_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_breaker_cooldown")]
    pub cooldown_ms: u64,
}

fn default_breaker_threshold() -> u32 {
    defaults::BREAKER_FAILURE_THRESHOLD
}

fn default_breaker_cooldown() -> u64 {
    defaults::BREAKER_COOLDOWN_MS
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_breaker_threshold(),
            cooldown_ms: default_breaker_cooldown(),
        }
    }
}

/// Self-healing orchestrator policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingConfig {
    #[serde(default = "default_tick")]
    pub tick_ms: u64,

    /// Quota for descriptors that do not declare their own.
    #[serde(default = "default_max_restarts")]
    pub max_restarts_per_window: u32,

    #[serde(default = "default_restart_window")]
    pub restart_window_ms: u64,

    #[serde(default = "default_grace")]
    pub grace_period_ms: u64,

    #[serde(default = "default_reprobe")]
    pub reprobe_interval_ms: u64,

    #[serde(default = "default_restart_timeout")]
    pub restart_timeout_ms: u64,

    #[serde(default = "default_attempts")]
    pub attempts_per_episode: u32,

    #[serde(default = "default_backoff")]
    pub restart_backoff_ms: u64,

    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

fn default_tick() -> u64 {
    defaults::HEALING_TICK_MS
}

fn default_max_restarts() -> u32 {
    defaults::MAX_RESTARTS_PER_WINDOW
}

fn default_restart_window() -> u64 {
    defaults::RESTART_WINDOW_MS
}

fn default_grace() -> u64 {
    defaults::GRACE_PERIOD_MS
}

fn default_reprobe() -> u64 {
    defaults::REPROBE_INTERVAL_MS
}

fn default_restart_timeout() -> u64 {
    defaults::RESTART_TIMEOUT_MS
}

fn default_attempts() -> u32 {
    defaults::ATTEMPTS_PER_EPISODE
}

fn default_backoff() -> u64 {
    defaults::RESTART_BACKOFF_MS
}

fn default_log_capacity() -> usize {
    defaults::HEALING_LOG_CAPACITY
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick(),
            max_restarts_per_window: default_max_restarts(),
            restart_window_ms: default_restart_window(),
            grace_period_ms: default_grace(),
            reprobe_interval_ms: default_reprobe(),
            restart_timeout_ms: default_restart_timeout(),
            attempts_per_episode: default_attempts(),
            restart_backoff_ms: default_backoff(),
            log_capacity: default_log_capacity(),
        }
    }
}

/// Event bus sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_history")]
    pub history_capacity: usize,

    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_ms: u64,
}

fn default_history() -> usize {
    defaults::BUS_HISTORY_CAPACITY
}

fn default_handler_timeout() -> u64 {
    defaults::HANDLER_TIMEOUT_MS
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history(),
            handler_timeout_ms: default_handler_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_entries() -> usize {
    defaults::ANALYTICS_MAX_ENTRIES
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
