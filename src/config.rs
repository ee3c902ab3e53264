//! Configuration management for the load balancer
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. Each configured integration entry is a
//! versioned record describing one mains/charger pair and their phase mapping.

use crate::chargers::ChargerBackend;
use crate::error::{BalancerError, Result};
use crate::mains::MainsBackend;
use crate::phase::{Phase, PhaseMapping};
use crate::statistics::HistoryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

mod defaults;

/// Highest entry schema version this build understands
pub const ENTRY_SCHEMA_VERSION: u32 = 1;

/// Environment variable pointing at an explicit config file
pub const CONFIG_PATH_ENV: &str = "EVLB_CONFIG";

fn default_entry_version() -> u32 {
    ENTRY_SCHEMA_VERSION
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Home Assistant REST API connection
    pub homeassistant: HomeAssistantConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Rolling history used for the noise margin
    pub statistics: StatisticsConfig,

    /// Update scheduling
    pub refresh: RefreshConfig,

    /// Automatic phase discovery tuning
    pub auto_match: AutoMatchConfig,

    /// Diagnostic output publishing
    pub diagnostics: DiagnosticsConfig,

    /// Configured integration entries
    pub entries: Vec<EntryConfig>,
}

/// Home Assistant REST API connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    /// Base URL, e.g. http://homeassistant.local:8123
    pub base_url: String,

    /// Long-lived access token. Falls back to SUPERVISOR_TOKEN / HA_TOKEN.
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// Attempts per request before giving up
    pub max_retries: u32,

    /// Initial backoff between attempts
    pub retry_delay_ms: u64,

    /// Per-request timeout
    pub request_timeout_ms: u64,

    /// How often tracked entities are checked for changes
    pub state_watch_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    pub console_level: Option<String>,

    /// Optional file-specific level
    pub file_level: Option<String>,

    /// Path to log file (its directory receives the daily rolled files)
    pub file: String,

    /// Number of rolled files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Retention of mains samples used for the standard deviation margin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Always keep at least this many recent samples
    pub min_samples: usize,

    /// Keep any sample younger than this
    pub max_age_seconds: u64,
}

/// Update scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Periodic update interval; 0 disables periodic ticks
    pub poll_interval_ms: u64,

    /// Debounce cooldown for change-triggered refreshes
    pub cooldown_ms: u64,

    /// Delay before retrying a failed setup
    pub setup_retry_seconds: u64,
}

/// Automatic phase discovery tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoMatchConfig {
    /// Minimum rise on a mains phase that counts as a match
    pub threshold_amps: f64,

    /// Polls per charger phase before giving up
    pub max_attempts: u32,

    /// Wait after each charger command
    pub settle_seconds: u64,

    /// Delay between polls
    pub poll_interval_ms: u64,

    /// Current commanded on the probed phase
    pub probe_current: f64,
}

/// Diagnostic output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Publish last-update / update-age sensors to the host
    pub publish: bool,
}

/// Phase assignment rows: mains_phaseN feeds charger_phaseN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasesConfig {
    pub mains_phase1: Phase,
    pub mains_phase2: Phase,
    pub mains_phase3: Phase,
    pub charger_phase1: Phase,
    pub charger_phase2: Phase,
    pub charger_phase3: Phase,
}

impl PhasesConfig {
    /// Validated bijective mapping
    pub fn mapping(&self) -> Result<PhaseMapping> {
        PhaseMapping::from_pairs([
            (self.mains_phase1, self.charger_phase1),
            (self.mains_phase2, self.charger_phase2),
            (self.mains_phase3, self.charger_phase3),
        ])
    }

    /// Rows for a known mapping, ordered by charger phase
    pub fn from_mapping(mapping: &PhaseMapping) -> Self {
        let [r1, r2, r3] = mapping.rows();
        Self {
            mains_phase1: r1.0,
            mains_phase2: r2.0,
            mains_phase3: r3.0,
            charger_phase1: r1.1,
            charger_phase2: r2.1,
            charger_phase3: r3.1,
        }
    }
}

/// One configured integration entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryConfig {
    /// Unique entry identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Entry schema version
    #[serde(default = "default_entry_version")]
    pub version: u32,

    /// Mains backend type (slimmelezer, sensors, template)
    #[serde(default)]
    pub mains_type: Option<String>,

    /// Charger backend type (easee, template)
    #[serde(default)]
    pub charger_type: Option<String>,

    /// Keep computing and logging limits while the charger is idle
    #[serde(default)]
    pub developer_mode: bool,

    /// Mains backend options
    #[serde(default)]
    pub mains: serde_yaml::Mapping,

    /// Charger backend options
    #[serde(default)]
    pub charger: serde_yaml::Mapping,

    /// Phase mapping; required, there is no safe default wiring
    pub phases: PhasesConfig,
}

impl EntryConfig {
    /// Resolve the typed mains backend selection
    pub fn mains_backend(&self) -> Result<MainsBackend> {
        MainsBackend::from_entry(self.mains_type.as_deref(), &self.mains)
    }

    /// Resolve the typed charger backend selection
    pub fn charger_backend(&self) -> Result<ChargerBackend> {
        ChargerBackend::from_entry(self.charger_type.as_deref(), &self.charger)
    }

    /// Entity id prefix for published diagnostics
    pub fn slug(&self) -> String {
        format!("ev_load_balancing_{}", self.name)
            .to_lowercase()
            .replace('.', "")
            .replace(' ', "_")
    }

    /// Validate the entry without touching the host
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(BalancerError::validation("entries.id", "Cannot be empty"));
        }
        if self.version > ENTRY_SCHEMA_VERSION {
            return Err(BalancerError::config(format!(
                "Entry '{}' has schema version {} but only versions up to {} are supported",
                self.id, self.version, ENTRY_SCHEMA_VERSION
            )));
        }
        self.mains_backend()?;
        self.charger_backend()?;
        self.phases.mapping()?;
        Ok(())
    }
}

impl StatisticsConfig {
    /// Retention policy for mains phase histories
    pub fn history_policy(&self) -> HistoryPolicy {
        HistoryPolicy::new(
            self.min_samples,
            chrono::Duration::seconds(i64::try_from(self.max_age_seconds).unwrap_or(i64::MAX)),
        )
    }
}

impl RefreshConfig {
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn setup_retry(&self) -> Duration {
        Duration::from_secs(self.setup_retry_seconds)
    }
}

impl HomeAssistantConfig {
    /// Token from config, then the add-on supervisor, then HA_TOKEN
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var("SUPERVISOR_TOKEN").ok())
            .or_else(|| std::env::var("HA_TOKEN").ok())
    }

    /// Base URL, switching to the supervisor proxy when running as an add-on
    pub fn resolve_base_url(&self) -> String {
        if self.token.is_none() && std::env::var_os("SUPERVISOR_TOKEN").is_some() {
            return "http://supervisor/core".to_string();
        }
        self.base_url.trim_end_matches('/').to_string()
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from `EVLB_CONFIG` or the default locations
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Self::from_file(path);
        }

        let default_paths = [
            "ev_load_balancing.yaml",
            "/data/ev_load_balancing.yaml",
            "/etc/ev-load-balancing/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Look up an entry by id
    pub fn entry(&self, id: &str) -> Option<&EntryConfig> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.homeassistant.base_url.is_empty() {
            return Err(BalancerError::validation(
                "homeassistant.base_url",
                "Cannot be empty",
            ));
        }

        if self.statistics.min_samples == 0 {
            return Err(BalancerError::validation(
                "statistics.min_samples",
                "Must be greater than 0",
            ));
        }

        if self.refresh.setup_retry_seconds == 0 {
            return Err(BalancerError::validation(
                "refresh.setup_retry_seconds",
                "Must be greater than 0",
            ));
        }

        if self.auto_match.threshold_amps <= 0.0 || self.auto_match.max_attempts == 0 {
            return Err(BalancerError::validation(
                "auto_match",
                "Threshold and attempts must be positive",
            ));
        }

        let mut seen = HashSet::new();
        for entry in &self.entries {
            if !seen.insert(entry.id.as_str()) {
                return Err(BalancerError::validation(
                    "entries.id".to_string(),
                    format!("Duplicate entry id '{}'", entry.id),
                ));
            }
            entry.validate()?;
        }

        Ok(())
    }
}
