//! Automatic discovery of the mains phase feeding each charger phase
//!
//! Each charger phase is probed in turn: all phases are commanded to 0 A,
//! mains baselines are taken, then only the probed phase is given the probe
//! current and the mains phases are polled for a rise above the threshold.

use crate::chargers::Charger;
use crate::config::AutoMatchConfig;
use crate::error::{BalancerError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::mains::Mains;
use crate::phase::{Phase, PhaseMapping};
use std::time::Duration;

/// Tuning of the discovery procedure
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSettings {
    /// Rise in amperes that identifies the fed mains phase
    pub threshold_amps: f64,
    pub max_attempts: u32,
    pub settle: Duration,
    pub poll_interval: Duration,
    pub probe_current: f64,
}

impl From<&AutoMatchConfig> for MatchSettings {
    fn from(config: &AutoMatchConfig) -> Self {
        Self {
            threshold_amps: config.threshold_amps,
            max_attempts: config.max_attempts,
            settle: Duration::from_secs(config.settle_seconds),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            probe_current: config.probe_current,
        }
    }
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self::from(&AutoMatchConfig::default())
    }
}

pub struct PhaseMatcher {
    settings: MatchSettings,
    logger: StructuredLogger,
}

impl PhaseMatcher {
    pub fn new(settings: MatchSettings) -> Self {
        Self {
            settings,
            logger: get_logger("phase_matching"),
        }
    }

    /// Probe every charger phase and return the discovered mapping
    pub async fn match_phases(&self, mains: &dyn Mains, charger: &dyn Charger) -> Result<PhaseMapping> {
        let mut rows = Vec::with_capacity(3);
        for charger_phase in Phase::ALL {
            let mains_phase = self.probe(mains, charger, charger_phase).await?;
            rows.push((mains_phase, charger_phase));
        }

        let rows: [(Phase, Phase); 3] = rows
            .try_into()
            .map_err(|_| BalancerError::phase_matching("Failed to match phases"))?;
        PhaseMapping::from_pairs(rows).map_err(|e| {
            BalancerError::phase_matching(format!("Failed to match phases: {}", e))
        })
    }

    async fn probe(
        &self,
        mains: &dyn Mains,
        charger: &dyn Charger,
        charger_phase: Phase,
    ) -> Result<Phase> {
        charger.set_limits(0.0, 0.0, 0.0).await?;
        tokio::time::sleep(self.settings.settle).await;

        mains.update().await;
        let baselines = read_mains(mains).ok_or_else(|| {
            BalancerError::phase_matching("Mains currents are unavailable for a baseline")
        })?;

        let mut limits = [0.0; 3];
        limits[charger_phase.index()] = self.settings.probe_current;
        charger.set_limits(limits[0], limits[1], limits[2]).await?;
        tokio::time::sleep(self.settings.settle).await;

        for attempt in 0..self.settings.max_attempts {
            mains.update().await;
            if let Some(found) = self.largest_rise(mains, &baselines) {
                self.logger.debug(&format!(
                    "Found match for charger {} in mains {} after {} attempts",
                    charger_phase, found, attempt
                ));
                return Ok(found);
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        Err(BalancerError::phase_matching(format!(
            "Could not find a matching mains phase for charger phase {}",
            charger_phase
        )))
    }

    fn largest_rise(&self, mains: &dyn Mains, baselines: &[f64; 3]) -> Option<Phase> {
        Phase::ALL
            .into_iter()
            .filter_map(|phase| {
                let current = mains.get_phase(phase)?.actual_current()?;
                let rise = current - baselines[phase.index()];
                (rise > self.settings.threshold_amps).then_some((phase, rise))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(phase, _)| phase)
    }
}

fn read_mains(mains: &dyn Mains) -> Option<[f64; 3]> {
    let mut values = [0.0; 3];
    for phase in Phase::ALL {
        values[phase.index()] = mains.get_phase(phase)?.actual_current()?;
    }
    Some(values)
}
