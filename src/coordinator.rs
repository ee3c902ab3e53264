//! Control loop for one configured entry
//!
//! The coordinator owns the mains and charger aggregates and the three phase
//! pairs built from the phase mapping. Each tick refreshes every reader,
//! checks that the charger is active, computes all three limits and applies
//! them in one command. If any limit is unknown nothing is sent.

use crate::balancer::{MissingReading, PhasePair};
use crate::chargers::{Charger, build_charger};
use crate::config::EntryConfig;
use crate::diagnostics::{DiagnosticsSnapshot, UpdateStatus};
use crate::error::{BalancerError, Result};
use crate::host::Host;
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::mains::{Mains, build_mains};
use crate::phase::{Phase, PhaseMapping};
use crate::scheduler::RefreshRequester;
use crate::statistics::HistoryPolicy;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Callback invoked after every successful apply
pub type UpdateListener = Box<dyn Fn() + Send + Sync>;

/// Lifecycle of a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Uninitialized,
    Ready,
    Shutdown,
}

/// Result of one update tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateOutcome {
    /// Limits for charger phases 1..3 were sent
    Applied([f64; 3]),
    /// The charger is not charging; nothing was sent
    Inactive,
    /// A reading for the pair feeding `phase` was missing; nothing was sent
    Unavailable {
        phase: Phase,
        missing: MissingReading,
    },
    /// Setup has not completed or the coordinator was shut down
    NotReady,
}

pub struct Coordinator {
    entry_id: String,
    developer_mode: bool,
    mapping: PhaseMapping,
    mains: Box<dyn Mains>,
    charger: Box<dyn Charger>,
    pairs: Vec<PhasePair>,
    state: CoordinatorState,
    status: UpdateStatus,
    listeners: Vec<UpdateListener>,
    logger: StructuredLogger,
}

impl Coordinator {
    /// Assemble a coordinator from already constructed aggregates
    pub fn new(
        entry_id: &str,
        name: &str,
        developer_mode: bool,
        mapping: PhaseMapping,
        mains: Box<dyn Mains>,
        charger: Box<dyn Charger>,
    ) -> Self {
        Self {
            entry_id: entry_id.to_string(),
            developer_mode,
            mapping,
            mains,
            charger,
            pairs: Vec::with_capacity(3),
            state: CoordinatorState::Uninitialized,
            status: UpdateStatus::new(entry_id, name),
            listeners: Vec::new(),
            logger: get_logger_with_context(LogContext::new("coordinator").with_entry(entry_id)),
        }
    }

    /// Build backends for an entry. Unknown types and bad mappings are
    /// fatal; missing device entities are retryable.
    pub async fn from_entry(
        entry: &EntryConfig,
        host: Arc<dyn Host>,
        refresh: RefreshRequester,
        policy: HistoryPolicy,
    ) -> Result<Self> {
        entry.validate()?;
        let mains_backend = entry.mains_backend()?;
        let charger_backend = entry.charger_backend()?;
        let mapping = entry.phases.mapping()?;

        let mut mains = build_mains(
            &entry.id,
            &mains_backend,
            host.clone(),
            refresh.clone(),
            policy,
        )
        .await?;
        let charger = match build_charger(&entry.id, &charger_backend, host, refresh).await {
            Ok(charger) => charger,
            Err(e) => {
                mains.cleanup();
                return Err(e);
            }
        };

        Ok(Self::new(
            &entry.id,
            &entry.name,
            entry.developer_mode,
            mapping,
            Box::new(mains),
            charger,
        ))
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn mapping(&self) -> PhaseMapping {
        self.mapping
    }

    pub fn pairs(&self) -> &[PhasePair] {
        &self.pairs
    }

    pub fn mains(&self) -> &dyn Mains {
        self.mains.as_ref()
    }

    pub fn charger(&self) -> &dyn Charger {
        self.charger.as_ref()
    }

    /// Build the three phase pairs. Any missing handle or rated limit
    /// clears the pairs and fails with a retryable error.
    pub async fn setup(&mut self) -> Result<()> {
        if self.state == CoordinatorState::Shutdown {
            return Err(BalancerError::generic("Coordinator has been shut down"));
        }
        self.pairs.clear();

        let rated = match self.rated_limits().await {
            Ok(rated) => rated,
            Err(e) => return Err(self.fail_setup(e)),
        };

        for charger_phase in Phase::ALL {
            let mains_phase = self.mapping.mains_for(charger_phase);
            match self.build_pair(mains_phase, charger_phase, rated) {
                Ok(pair) => {
                    self.logger.debug(&format!(
                        "Paired mains {} ({}) with charger {} ({})",
                        mains_phase,
                        pair.mains_name(),
                        charger_phase,
                        pair.charger_name()
                    ));
                    self.pairs.push(pair);
                }
                Err(e) => return Err(self.fail_setup(e)),
            }
        }

        self.state = CoordinatorState::Ready;
        self.logger.info("Coordinator ready");
        Ok(())
    }

    fn fail_setup(&mut self, error: BalancerError) -> BalancerError {
        self.pairs.clear();
        self.state = CoordinatorState::Uninitialized;
        self.logger.warn(&format!("Setup failed: {}", error));
        error
    }

    /// (mains, charger) rated limits, read once per setup
    async fn rated_limits(&self) -> Result<(u32, u32)> {
        let mains_rated = self
            .mains
            .get_rated_limit()
            .await
            .ok_or_else(|| BalancerError::setup("Mains rated limit is not available"))?;
        let charger_rated = self
            .charger
            .get_rated_limit()
            .await
            .ok_or_else(|| BalancerError::setup("Charger rated limit is not available"))?;
        Ok((mains_rated, charger_rated))
    }

    fn build_pair(
        &self,
        mains_phase: Phase,
        charger_phase: Phase,
        (mains_rated, charger_rated): (u32, u32),
    ) -> Result<PhasePair> {
        let mains = self.mains.get_phase(mains_phase).ok_or_else(|| {
            BalancerError::setup(format!("Mains phase {} is not available", mains_phase))
        })?;
        let charger = self.charger.get_phase(charger_phase).ok_or_else(|| {
            BalancerError::setup(format!("Charger phase {} is not available", charger_phase))
        })?;

        Ok(PhasePair::new(
            mains_phase,
            mains,
            mains_rated,
            charger_phase,
            charger,
            charger_rated,
        ))
    }

    /// Run one tick at the current time
    pub async fn update(&mut self) -> Result<UpdateOutcome> {
        self.update_at(Utc::now()).await
    }

    /// Run one tick, recording `now` as the apply time on success.
    ///
    /// Only a failed charger command is returned as an error.
    pub async fn update_at(&mut self, now: DateTime<Utc>) -> Result<UpdateOutcome> {
        if self.state != CoordinatorState::Ready || self.pairs.len() != 3 {
            self.logger.debug("Skipping update, coordinator is not ready");
            return Ok(UpdateOutcome::NotReady);
        }

        self.charger.update().await;
        self.mains.update().await;

        let charging_state = self.charger.charging_state().await;
        if !charging_state.is_active() {
            if self.developer_mode {
                self.log_limits_preview();
            } else {
                self.logger
                    .debug("Charger is not active, skipping limit calculation");
            }
            return Ok(UpdateOutcome::Inactive);
        }

        let mut limits = [0.0; 3];
        for (slot, pair) in limits.iter_mut().zip(&self.pairs) {
            match pair.try_new_limit() {
                Ok(limit) => *slot = limit,
                Err(missing) => {
                    self.logger.warn(&format!(
                        "{} for charger {} / mains {} is unavailable, not applying any limits",
                        match missing {
                            MissingReading::MainsCurrent => "Mains current",
                            MissingReading::ChargerLimit => "Charger limit",
                        },
                        pair.charger_phase,
                        pair.mains_phase
                    ));
                    return Ok(UpdateOutcome::Unavailable {
                        phase: pair.charger_phase,
                        missing,
                    });
                }
            }
        }

        self.logger.info(&format!(
            "Applying limits {:.2} / {:.2} / {:.2} A",
            limits[0], limits[1], limits[2]
        ));
        self.charger
            .set_limits(limits[0], limits[1], limits[2])
            .await?;

        self.status.record(now, limits);
        for listener in &self.listeners {
            listener();
        }
        Ok(UpdateOutcome::Applied(limits))
    }

    fn log_limits_preview(&self) {
        let preview: Vec<String> = self
            .pairs
            .iter()
            .map(|pair| match pair.get_new_limit() {
                Some(limit) => format!("{}={:.2}", pair.charger_phase, limit),
                None => format!("{}=unknown", pair.charger_phase),
            })
            .collect();
        self.logger.info(&format!(
            "Developer mode: charger inactive, would set {}",
            preview.join(", ")
        ));
    }

    /// Register a callback run after every successful apply
    pub fn register_update_listener(&mut self, listener: UpdateListener) {
        self.listeners.push(listener);
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.status.last_update()
    }

    /// Shared status handle for observers
    pub fn status(&self) -> UpdateStatus {
        self.status.clone()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.status.snapshot()
    }

    /// Release backend subscriptions; further ticks are ignored
    pub fn shutdown(&mut self) {
        if self.state == CoordinatorState::Shutdown {
            return;
        }
        self.mains.cleanup();
        self.charger.cleanup();
        self.pairs.clear();
        self.listeners.clear();
        self.state = CoordinatorState::Shutdown;
        self.logger.info("Coordinator shut down");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
