//! Phase identifiers, charging state and the mains/charger phase mapping

use crate::error::{BalancerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three AC supply lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Phase1,
    Phase2,
    Phase3,
}

impl Phase {
    /// All phases in their fixed order
    pub const ALL: [Phase; 3] = [Phase::Phase1, Phase::Phase2, Phase::Phase3];

    /// Zero-based index used for per-phase arrays
    pub fn index(self) -> usize {
        match self {
            Phase::Phase1 => 0,
            Phase::Phase2 => 1,
            Phase::Phase3 => 2,
        }
    }

    /// Config string value
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Phase1 => "PHASE1",
            Phase::Phase2 => "PHASE2",
            Phase::Phase3 => "PHASE3",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Phase {
    type Err = BalancerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "PHASE1" | "1" | "L1" => Ok(Phase::Phase1),
            "PHASE2" | "2" | "L2" => Ok(Phase::Phase2),
            "PHASE3" | "3" | "L3" => Ok(Phase::Phase3),
            _ => Err(BalancerError::config(format!(
                "Unknown phase '{}'. Supported phases: PHASE1, PHASE2, PHASE3",
                s
            ))),
        }
    }
}

/// Activity state reported by a charger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingState {
    /// Idle, nothing to balance
    Off,
    /// Charging requested or about to start
    Pending,
    /// Actively charging
    Charging,
}

impl ChargingState {
    /// Whether limits should be computed and applied in this state
    pub fn is_active(self) -> bool {
        matches!(self, ChargingState::Pending | ChargingState::Charging)
    }
}

/// Bijective mapping between mains phases and charger phases
///
/// Stored as `charger_to_mains[charger.index()] = mains`. Construction
/// rejects any mapping that uses a phase twice on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseMapping {
    charger_to_mains: [Phase; 3],
}

impl PhaseMapping {
    /// Mains phase N feeds charger phase N
    pub fn identity() -> Self {
        Self {
            charger_to_mains: Phase::ALL,
        }
    }

    /// Build a mapping from (mains, charger) assignment rows
    pub fn from_pairs(pairs: [(Phase, Phase); 3]) -> Result<Self> {
        let mut charger_to_mains: [Option<Phase>; 3] = [None; 3];
        let mut mains_used = [false; 3];

        for (mains, charger) in pairs {
            if mains_used[mains.index()] {
                return Err(BalancerError::config(format!(
                    "Mains phase {} is mapped more than once",
                    mains
                )));
            }
            mains_used[mains.index()] = true;

            if charger_to_mains[charger.index()].is_some() {
                return Err(BalancerError::config(format!(
                    "Charger phase {} is mapped more than once",
                    charger
                )));
            }
            charger_to_mains[charger.index()] = Some(mains);
        }

        match charger_to_mains {
            [Some(a), Some(b), Some(c)] => Ok(Self {
                charger_to_mains: [a, b, c],
            }),
            _ => Err(BalancerError::config("Phase mapping is incomplete")),
        }
    }

    /// Mains phase feeding the given charger phase
    pub fn mains_for(&self, charger: Phase) -> Phase {
        self.charger_to_mains[charger.index()]
    }

    /// Charger phase fed by the given mains phase
    pub fn charger_for(&self, mains: Phase) -> Phase {
        Phase::ALL
            .into_iter()
            .find(|charger| self.charger_to_mains[charger.index()] == mains)
            .unwrap_or(mains)
    }

    /// (mains, charger) rows in fixed charger phase order
    pub fn rows(&self) -> [(Phase, Phase); 3] {
        Phase::ALL.map(|charger| (self.mains_for(charger), charger))
    }
}

impl Default for PhaseMapping {
    fn default() -> Self {
        Self::identity()
    }
}
