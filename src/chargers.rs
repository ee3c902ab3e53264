//! Charger backends
//!
//! A charger reports its per-phase current limits, its rated circuit limit
//! and whether it is charging, and accepts a combined three-phase limit
//! command.

use crate::error::{BalancerError, Result};
use crate::host::Host;
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::lock;
use crate::phase::{ChargingState, Phase};
use crate::reading::ReadingSource;
use crate::scheduler::RefreshRequester;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

pub mod easee;
pub mod template;

pub use easee::EaseeCharger;
pub use template::TemplateCharger;

/// Live reading of one charger phase limit
#[async_trait::async_trait]
pub trait ChargerPhaseReading: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the present limit; never fails
    async fn update(&self);

    /// Last fetched limit, `None` if unavailable
    fn current_limit(&self) -> Option<f64>;
}

/// A controllable charger
#[async_trait::async_trait]
pub trait Charger: Send + Sync {
    fn device_id(&self) -> Option<&str>;
    fn get_phase(&self, phase: Phase) -> Option<Arc<dyn ChargerPhaseReading>>;
    async fn get_rated_limit(&self) -> Option<u32>;
    async fn charging_state(&self) -> ChargingState;

    /// Apply all three phase limits in one command
    async fn set_limits(&self, phase1: f64, phase2: f64, phase3: f64) -> Result<()>;

    async fn update(&self);

    /// Release change tracking
    fn cleanup(&mut self);
}

/// Supported charger backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargerKind {
    Easee,
    Template,
}

impl ChargerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChargerKind::Easee => "easee",
            ChargerKind::Template => "template",
        }
    }
}

impl fmt::Display for ChargerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChargerKind {
    type Err = BalancerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "easee" => Ok(ChargerKind::Easee),
            "template" => Ok(ChargerKind::Template),
            _ => Err(BalancerError::config(format!(
                "The provided charger type ({}) is not supported. Supported types: easee, template",
                s
            ))),
        }
    }
}

fn default_expires() -> u32 {
    10
}

/// Options of the Easee charger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EaseeOptions {
    pub device_id: String,
    /// Minutes before the dynamic circuit limit falls back
    #[serde(default = "default_expires", alias = "charger_expires")]
    pub expires: u32,
}

/// Options of the template-driven charger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateChargerOptions {
    pub charger_phase1: String,
    pub charger_phase2: String,
    pub charger_phase3: String,
    pub charger_active: String,
    pub charger_limit: String,
    pub charger_command: String,
}

/// A charger backend selection resolved from an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargerBackend {
    Easee(EaseeOptions),
    Template(TemplateChargerOptions),
}

impl ChargerBackend {
    /// Resolve the configured type string and option map
    pub fn from_entry(kind: Option<&str>, options: &serde_yaml::Mapping) -> Result<Self> {
        let kind: ChargerKind = kind
            .ok_or_else(|| BalancerError::config("No charger type specified"))?
            .parse()?;
        let value = serde_yaml::Value::Mapping(options.clone());
        let invalid = |e: serde_yaml::Error| {
            BalancerError::config(format!("Invalid {} charger options: {}", kind, e))
        };

        match kind {
            ChargerKind::Easee => Ok(ChargerBackend::Easee(
                serde_yaml::from_value(value).map_err(invalid)?,
            )),
            ChargerKind::Template => Ok(ChargerBackend::Template(
                serde_yaml::from_value(value).map_err(invalid)?,
            )),
        }
    }

    pub fn kind(&self) -> ChargerKind {
        match self {
            ChargerBackend::Easee(_) => ChargerKind::Easee,
            ChargerBackend::Template(_) => ChargerKind::Template,
        }
    }
}

/// Phase limit reader over a single [`ReadingSource`]
pub struct ChargerPhase {
    name: String,
    source: ReadingSource,
    host: Arc<dyn Host>,
    value: Mutex<Option<f64>>,
    logger: StructuredLogger,
}

impl ChargerPhase {
    pub fn new(source: ReadingSource, host: Arc<dyn Host>, logger: StructuredLogger) -> Self {
        Self {
            name: source.describe(),
            source,
            host,
            value: Mutex::new(None),
            logger,
        }
    }
}

#[async_trait::async_trait]
impl ChargerPhaseReading for ChargerPhase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update(&self) {
        let value = self.source.read_f64(&*self.host, &self.logger).await;
        *lock(&self.value) = value;
    }

    fn current_limit(&self) -> Option<f64> {
        *lock(&self.value)
    }
}

/// Negative limits are requests for no current at all
pub(crate) fn clamp_limits(limits: [f64; 3], logger: &StructuredLogger) -> [f64; 3] {
    limits.map(|limit| {
        if limit < 0.0 {
            logger.warn(&format!("Clamping negative limit {:.2} A to 0 A", limit));
            0.0
        } else {
            limit
        }
    })
}

/// Rated limits are whole amperes; the fraction is dropped
pub(crate) fn rated_from_reading(value: Option<f64>, logger: &StructuredLogger) -> Option<u32> {
    match value {
        Some(v) if v >= 0.0 => {
            let limit = v.trunc() as u32;
            logger.debug(&format!("Returning rated limit {} A for charger circuit", limit));
            Some(limit)
        }
        Some(v) => {
            logger.warn(&format!("Ignoring negative rated limit {}", v));
            None
        }
        None => None,
    }
}

/// Construct the charger for a resolved backend
pub async fn build_charger(
    entry_id: &str,
    backend: &ChargerBackend,
    host: Arc<dyn Host>,
    refresh: RefreshRequester,
) -> Result<Box<dyn Charger>> {
    let logger = get_logger_with_context(
        LogContext::new(&format!("charger.{}", backend.kind())).with_entry(entry_id),
    );
    let charger: Box<dyn Charger> = match backend {
        ChargerBackend::Easee(options) => {
            Box::new(EaseeCharger::connect(options, host, refresh, logger).await?)
        }
        ChargerBackend::Template(options) => {
            Box::new(TemplateCharger::new(options.clone(), host, logger)?)
        }
    };
    Ok(charger)
}
