//! Mains measurement backends
//!
//! A mains aggregate owns three phase readers plus the configured rated
//! limit. Backends differ only in where the phase readings come from:
//!
//! - `slimmelezer`: current sensors discovered from a meter device
//! - `sensors`: three explicitly named sensor entities
//! - `template`: three expressions rendered by the host

use crate::error::{BalancerError, Result};
use crate::host::{Host, Subscription};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::phase::Phase;
use crate::reading::ReadingSource;
use crate::scheduler::RefreshRequester;
use crate::statistics::{HistoryPolicy, SampledCurrent};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

mod device;
mod sensors;
mod template;

/// Smallest and largest accepted mains rating
pub const MAINS_LIMIT_RANGE: std::ops::RangeInclusive<u32> = 6..=80;

/// Live reading of one mains phase
#[async_trait::async_trait]
pub trait MainsPhaseReading: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch a fresh sample; never fails
    async fn update(&self);

    /// Last fetched value, `None` if unavailable
    fn actual_current(&self) -> Option<f64>;

    /// Noise margin over the recent history
    fn stddev_current(&self) -> f64;
}

/// Mains supply with three phases and a rated limit
#[async_trait::async_trait]
pub trait Mains: Send + Sync {
    fn device_id(&self) -> Option<&str>;
    fn get_phase(&self, phase: Phase) -> Option<Arc<dyn MainsPhaseReading>>;
    async fn get_rated_limit(&self) -> Option<u32>;
    async fn update(&self);

    /// Release change tracking
    fn cleanup(&mut self);
}

/// Supported mains backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainsKind {
    Slimmelezer,
    Sensors,
    Template,
}

impl MainsKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MainsKind::Slimmelezer => "slimmelezer",
            MainsKind::Sensors => "sensors",
            MainsKind::Template => "template",
        }
    }
}

impl fmt::Display for MainsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MainsKind {
    type Err = BalancerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "slimmelezer" => Ok(MainsKind::Slimmelezer),
            "sensors" | "sensor_entities" => Ok(MainsKind::Sensors),
            "template" => Ok(MainsKind::Template),
            _ => Err(BalancerError::config(format!(
                "The provided mains type ({}) is not supported. Supported types: slimmelezer, sensors, template",
                s
            ))),
        }
    }
}

/// Options of the device-backed mains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMainsOptions {
    pub device_id: String,
    pub mains_limit: u32,
}

/// Options of the sensor- and template-backed mains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSourceMainsOptions {
    pub mains_phase1: String,
    pub mains_phase2: String,
    pub mains_phase3: String,
    pub mains_limit: u32,
}

impl PhaseSourceMainsOptions {
    fn phase_sources(&self) -> [&str; 3] {
        [
            self.mains_phase1.as_str(),
            self.mains_phase2.as_str(),
            self.mains_phase3.as_str(),
        ]
    }
}

/// A mains backend selection resolved from an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MainsBackend {
    Slimmelezer(DeviceMainsOptions),
    Sensors(PhaseSourceMainsOptions),
    Template(PhaseSourceMainsOptions),
}

impl MainsBackend {
    /// Resolve the configured type string and option map
    pub fn from_entry(kind: Option<&str>, options: &serde_yaml::Mapping) -> Result<Self> {
        let kind: MainsKind = kind
            .ok_or_else(|| BalancerError::config("No mains type specified"))?
            .parse()?;
        let value = serde_yaml::Value::Mapping(options.clone());
        let invalid =
            |e: serde_yaml::Error| BalancerError::config(format!("Invalid {} mains options: {}", kind, e));

        let backend = match kind {
            MainsKind::Slimmelezer => {
                MainsBackend::Slimmelezer(serde_yaml::from_value(value).map_err(invalid)?)
            }
            MainsKind::Sensors => {
                MainsBackend::Sensors(serde_yaml::from_value(value).map_err(invalid)?)
            }
            MainsKind::Template => {
                MainsBackend::Template(serde_yaml::from_value(value).map_err(invalid)?)
            }
        };

        let limit = backend.rated_limit();
        if !MAINS_LIMIT_RANGE.contains(&limit) {
            return Err(BalancerError::config(format!(
                "mains_limit {} A is outside {}..={} A",
                limit,
                MAINS_LIMIT_RANGE.start(),
                MAINS_LIMIT_RANGE.end()
            )));
        }
        Ok(backend)
    }

    pub fn kind(&self) -> MainsKind {
        match self {
            MainsBackend::Slimmelezer(_) => MainsKind::Slimmelezer,
            MainsBackend::Sensors(_) => MainsKind::Sensors,
            MainsBackend::Template(_) => MainsKind::Template,
        }
    }

    pub fn rated_limit(&self) -> u32 {
        match self {
            MainsBackend::Slimmelezer(o) => o.mains_limit,
            MainsBackend::Sensors(o) | MainsBackend::Template(o) => o.mains_limit,
        }
    }
}

/// Phase reader over a single [`ReadingSource`] with rolling statistics
pub struct MainsPhase {
    name: String,
    source: ReadingSource,
    host: Arc<dyn Host>,
    sampled: SampledCurrent,
    logger: StructuredLogger,
}

impl MainsPhase {
    pub fn new(
        source: ReadingSource,
        host: Arc<dyn Host>,
        policy: HistoryPolicy,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            name: source.describe(),
            source,
            host,
            sampled: SampledCurrent::new(policy),
            logger,
        }
    }
}

#[async_trait::async_trait]
impl MainsPhaseReading for MainsPhase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update(&self) {
        let value = self.source.read_f64(&*self.host, &self.logger).await;
        if value.is_none() {
            self.logger
                .debug(&format!("Skipping history for {} since value is unavailable", self.name));
        }
        self.sampled.store(Utc::now(), value);
    }

    fn actual_current(&self) -> Option<f64> {
        self.sampled.current()
    }

    fn stddev_current(&self) -> f64 {
        self.sampled.stddev()
    }
}

/// Mains aggregate shared by every backend
pub struct MainsMeter {
    kind: MainsKind,
    device_id: Option<String>,
    phases: [Arc<MainsPhase>; 3],
    rated_limit: u32,
    subscription: Option<Subscription>,
    logger: StructuredLogger,
}

impl MainsMeter {
    pub fn kind(&self) -> MainsKind {
        self.kind
    }

    /// Whether change tracking is still registered
    pub fn is_tracking(&self) -> bool {
        self.subscription.as_ref().is_some_and(Subscription::is_active)
    }
}

#[async_trait::async_trait]
impl Mains for MainsMeter {
    fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn get_phase(&self, phase: Phase) -> Option<Arc<dyn MainsPhaseReading>> {
        let reader: Arc<dyn MainsPhaseReading> = self.phases[phase.index()].clone();
        Some(reader)
    }

    async fn get_rated_limit(&self) -> Option<u32> {
        Some(self.rated_limit)
    }

    async fn update(&self) {
        for phase in &self.phases {
            phase.update().await;
        }
    }

    fn cleanup(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.release();
            self.logger.debug("Released mains change tracking");
        }
    }
}

/// Construct the mains aggregate for a resolved backend
pub async fn build_mains(
    entry_id: &str,
    backend: &MainsBackend,
    host: Arc<dyn Host>,
    refresh: RefreshRequester,
    policy: HistoryPolicy,
) -> Result<MainsMeter> {
    let kind = backend.kind();
    let logger = get_logger_with_context(
        LogContext::new(&format!("mains.{}", kind)).with_entry(entry_id),
    );

    let (device_id, sources) = match backend {
        MainsBackend::Slimmelezer(options) => (
            Some(options.device_id.clone()),
            device::phase_sources(&*host, &options.device_id).await?,
        ),
        MainsBackend::Sensors(options) => (None, sensors::phase_sources(&*host, options).await?),
        MainsBackend::Template(options) => (None, template::phase_sources(options)?),
    };

    logger.info(&format!(
        "Mains ready: {} / {} / {} rated {} A",
        sources[0].describe(),
        sources[1].describe(),
        sources[2].describe(),
        backend.rated_limit()
    ));

    let tracked: Vec<String> = sources
        .iter()
        .filter_map(|s| s.tracked_entity().map(str::to_string))
        .collect();
    let subscription = (!tracked.is_empty()).then(|| host.track_state_changes(&tracked, refresh));

    let phases = sources.map(|source| {
        Arc::new(MainsPhase::new(
            source,
            host.clone(),
            policy,
            logger.clone(),
        ))
    });

    Ok(MainsMeter {
        kind,
        device_id,
        phases,
        rated_limit: backend.rated_limit(),
        subscription,
        logger,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryHost;

    fn options(yaml: &str) -> serde_yaml::Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn meter_is_shareable_across_tasks() {
        assert_send_sync::<MainsMeter>();
        assert_send_sync::<MainsPhase>();
        assert_send_sync::<Subscription>();
    }

    #[test]
    fn resolves_backend_types() {
        let backend = MainsBackend::from_entry(
            Some("slimmelezer"),
            &options("device_id: meter\nmains_limit: 25"),
        )
        .unwrap();
        assert_eq!(backend.kind(), MainsKind::Slimmelezer);
        assert_eq!(backend.rated_limit(), 25);

        let err = MainsBackend::from_entry(Some("p1mon"), &options("{}")).unwrap_err();
        assert!(err.to_string().contains("Supported types"));
        assert!(matches!(
            MainsBackend::from_entry(None, &options("{}")),
            Err(BalancerError::Config { .. })
        ));
    }

    #[test]
    fn rejects_bad_options() {
        assert!(MainsBackend::from_entry(Some("template"), &options("mains_limit: 20")).is_err());
        assert!(
            MainsBackend::from_entry(
                Some("slimmelezer"),
                &options("device_id: meter\nmains_limit: 200"),
            )
            .is_err()
        );
    }

    #[tokio::test]
    async fn sensor_mains_reads_and_tracks() {
        let host = MemoryHost::new();
        host.set_state("sensor.l1", "3.5");
        host.set_state("sensor.l2", "unavailable");
        host.set_state("sensor.l3", "1");

        let backend = MainsBackend::from_entry(
            Some("sensors"),
            &options(
                "mains_phase1: sensor.l1\nmains_phase2: sensor.l2\nmains_phase3: sensor.l3\nmains_limit: 20",
            ),
        )
        .unwrap();
        let mut mains = build_mains(
            "entry",
            &backend,
            Arc::new(host.clone()),
            RefreshRequester::detached(),
            HistoryPolicy::default(),
        )
        .await
        .unwrap();

        mains.update().await;
        let l1 = mains.get_phase(Phase::Phase1).unwrap();
        assert_eq!(l1.actual_current(), Some(3.5));
        assert_eq!(l1.stddev_current(), 0.0);
        assert_eq!(
            mains.get_phase(Phase::Phase2).unwrap().actual_current(),
            None
        );
        assert_eq!(mains.get_rated_limit().await, Some(20));
        assert_eq!(host.tracker_count(), 1);

        mains.cleanup();
        assert!(!mains.is_tracking());
        assert_eq!(host.tracker_count(), 0);
    }
}
