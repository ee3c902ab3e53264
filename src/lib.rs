//! # EV Load Balancing
//!
//! Per-phase current limiting for an EV charger so the building's mains
//! never exceed their rated current while the car charges as fast as the
//! spare capacity allows.
//!
//! ## Architecture
//!
//! - `phase`: phase identifiers, charging state and the phase mapping
//! - `host`: home-automation host abstraction (in-memory and REST)
//! - `reading`: conversion of host values into ampere readings
//! - `statistics`: rolling history and standard deviation noise margin
//! - `mains` / `chargers`: backends behind uniform aggregate traits
//! - `balancer`: the per-phase limit calculation
//! - `coordinator`: the control loop for one configured entry
//! - `scheduler`: debounced refresh requests
//! - `registry`: live coordinators keyed by entry id
//! - `diagnostics`: last-update observability
//! - `phase_matching`: automatic phase discovery
//! - `service`: runtime driving every configured entry
//! - `config`, `logging`, `error`: ambient configuration, tracing and errors

pub mod balancer;
pub mod chargers;
pub mod config;
pub mod coordinator;
pub mod diagnostics;
pub mod error;
pub mod host;
pub mod logging;
pub mod mains;
pub mod phase;
pub mod phase_matching;
pub mod reading;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod statistics;

// Re-export commonly used types
pub use config::{Config, EntryConfig};
pub use coordinator::{Coordinator, UpdateOutcome};
pub use error::{BalancerError, Result};
pub use phase::{ChargingState, Phase, PhaseMapping};

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
