//! Per-phase limit calculation
//!
//! The new limit for one charger phase is the charger's present limit grown
//! by the spare capacity on the mains phase feeding it, reduced by the noise
//! margin, and capped by both rated limits.

use crate::chargers::ChargerPhaseReading;
use crate::mains::MainsPhaseReading;
use crate::phase::Phase;
use std::sync::Arc;

/// Inputs of a single limit decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitInputs {
    pub mains_actual: Option<f64>,
    pub mains_stddev: f64,
    pub mains_rated: u32,
    pub charger_limit: Option<f64>,
    pub charger_rated: u32,
}

/// Proposed limit before the caps are applied
pub fn proposed_limit(
    mains_actual: f64,
    mains_stddev: f64,
    mains_rated: u32,
    charger_limit: f64,
) -> f64 {
    let spare = f64::from(mains_rated) - mains_actual;
    charger_limit + spare - mains_stddev
}

/// New limit, or `None` when either reading is unavailable. Not floored at zero.
pub fn compute_new_limit(inputs: &LimitInputs) -> Option<f64> {
    let mains_actual = inputs.mains_actual?;
    let charger_limit = inputs.charger_limit?;
    let proposed = proposed_limit(
        mains_actual,
        inputs.mains_stddev,
        inputs.mains_rated,
        charger_limit,
    );
    Some(
        proposed
            .min(f64::from(inputs.charger_rated))
            .min(f64::from(inputs.mains_rated)),
    )
}

/// Why a pair could not produce a limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReading {
    MainsCurrent,
    ChargerLimit,
}

/// One mains phase bound to the charger phase it feeds
#[derive(Clone)]
pub struct PhasePair {
    pub mains_phase: Phase,
    pub charger_phase: Phase,
    mains: Arc<dyn MainsPhaseReading>,
    mains_rated: u32,
    charger: Arc<dyn ChargerPhaseReading>,
    charger_rated: u32,
}

impl PhasePair {
    pub fn new(
        mains_phase: Phase,
        mains: Arc<dyn MainsPhaseReading>,
        mains_rated: u32,
        charger_phase: Phase,
        charger: Arc<dyn ChargerPhaseReading>,
        charger_rated: u32,
    ) -> Self {
        Self {
            mains_phase,
            charger_phase,
            mains,
            mains_rated,
            charger,
            charger_rated,
        }
    }

    /// Snapshot of the cached readings
    pub fn inputs(&self) -> LimitInputs {
        LimitInputs {
            mains_actual: self.mains.actual_current(),
            mains_stddev: self.mains.stddev_current(),
            mains_rated: self.mains_rated,
            charger_limit: self.charger.current_limit(),
            charger_rated: self.charger_rated,
        }
    }

    pub fn get_new_limit(&self) -> Option<f64> {
        compute_new_limit(&self.inputs())
    }

    /// Like [`get_new_limit`](Self::get_new_limit) but names the missing value
    pub fn try_new_limit(&self) -> Result<f64, MissingReading> {
        let inputs = self.inputs();
        if inputs.mains_actual.is_none() {
            return Err(MissingReading::MainsCurrent);
        }
        compute_new_limit(&inputs).ok_or(MissingReading::ChargerLimit)
    }

    pub fn mains_name(&self) -> &str {
        self.mains.name()
    }

    pub fn charger_name(&self) -> &str {
        self.charger.name()
    }
}

impl std::fmt::Debug for PhasePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhasePair")
            .field("mains_phase", &self.mains_phase)
            .field("mains", &self.mains.name())
            .field("mains_rated", &self.mains_rated)
            .field("charger_phase", &self.charger_phase)
            .field("charger", &self.charger.name())
            .field("charger_rated", &self.charger_rated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn inputs(actual: f64, stddev: f64, limit: f64) -> LimitInputs {
        LimitInputs {
            mains_actual: Some(actual),
            mains_stddev: stddev,
            mains_rated: 20,
            charger_limit: Some(limit),
            charger_rated: 16,
        }
    }

    #[test]
    fn spare_capacity_grows_and_shrinks_limit() {
        assert_eq!(compute_new_limit(&inputs(18.0, 0.0, 10.0)), Some(12.0));
        assert_eq!(compute_new_limit(&inputs(10.0, 0.0, 10.0)), Some(16.0));
        assert_eq!(compute_new_limit(&inputs(25.0, 1.0, 10.0)), Some(4.0));
        assert_eq!(compute_new_limit(&inputs(40.0, 0.0, 6.0)), Some(-14.0));
    }

    #[test]
    fn unknown_readings_propagate() {
        let mut missing_mains = inputs(10.0, 0.0, 10.0);
        missing_mains.mains_actual = None;
        assert_eq!(compute_new_limit(&missing_mains), None);

        let mut missing_charger = inputs(10.0, 0.0, 10.0);
        missing_charger.charger_limit = None;
        assert_eq!(compute_new_limit(&missing_charger), None);
    }

    #[test]
    fn randomized_cap_and_unknown_propagation() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..10_000 {
            let mains_rated = rng.gen_range(6..=80u32);
            let charger_rated = rng.gen_range(6..=32u32);
            let input = LimitInputs {
                mains_actual: Some(rng.gen_range(-10.0..100.0)),
                mains_stddev: rng.gen_range(0.0..10.0),
                mains_rated,
                charger_limit: Some(rng.gen_range(0.0..40.0)),
                charger_rated,
            };
            let limit = compute_new_limit(&input).unwrap();
            assert!(limit <= f64::from(mains_rated.min(charger_rated)));

            let drop_mains = rng.gen_range(0..2) == 0;
            let mut unknown = input;
            if drop_mains {
                unknown.mains_actual = None;
            } else {
                unknown.charger_limit = None;
            }
            assert_eq!(compute_new_limit(&unknown), None);
        }
    }

    #[test]
    fn randomized_stddev_monotonicity() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..10_000 {
            let actual = rng.gen_range(0.0..60.0);
            let limit = rng.gen_range(0.0..32.0);
            let rated = rng.gen_range(6..=80u32);
            let low = rng.gen_range(0.0..5.0);
            let high = low + rng.gen_range(0.001..5.0);

            assert!(
                proposed_limit(actual, high, rated, limit)
                    < proposed_limit(actual, low, rated, limit)
            );

            let capped = |sd| {
                compute_new_limit(&LimitInputs {
                    mains_actual: Some(actual),
                    mains_stddev: sd,
                    mains_rated: rated,
                    charger_limit: Some(limit),
                    charger_rated: 16,
                })
                .unwrap()
            };
            assert!(capped(high) <= capped(low));
        }
    }
}
