//! Charger driven entirely by host expressions
//!
//! `charger_command` is rendered with the variables `phase1`..`phase3` and
//! must produce `{"service": "domain.service", "data": {...}}`, either as a
//! JSON object or as text containing one.

use super::{
    Charger, ChargerPhase, ChargerPhaseReading, TemplateChargerOptions, clamp_limits,
    rated_from_reading,
};
use crate::error::{BalancerError, Result};
use crate::host::{Host, TemplateVariables};
use crate::logging::StructuredLogger;
use crate::phase::{ChargingState, Phase};
use crate::reading::{ReadingSource, template_bool, template_f64};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// A service call produced by the command template
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RenderedCommand {
    pub service: String,
    #[serde(default)]
    pub data: Value,
}

impl RenderedCommand {
    /// Interpret a rendered template value
    pub fn from_rendered(value: Value) -> Result<Self> {
        let value = match value {
            Value::String(text) => serde_json::from_str(&text).map_err(|e| {
                BalancerError::command(format!("Command template did not render JSON: {}", e))
            })?,
            other => other,
        };
        let command: RenderedCommand = serde_json::from_value(value).map_err(|e| {
            BalancerError::command(format!("Command template rendered an invalid command: {}", e))
        })?;
        command.split_service()?;
        Ok(command)
    }

    /// `(domain, service)` of the call
    pub fn split_service(&self) -> Result<(&str, &str)> {
        match self.service.split_once('.') {
            Some((domain, service)) if !domain.is_empty() && !service.is_empty() => {
                Ok((domain, service))
            }
            _ => Err(BalancerError::command(format!(
                "Service '{}' is not of the form domain.service",
                self.service
            ))),
        }
    }
}

pub struct TemplateCharger {
    options: TemplateChargerOptions,
    phases: [Arc<ChargerPhase>; 3],
    host: Arc<dyn Host>,
    logger: StructuredLogger,
}

impl TemplateCharger {
    pub fn new(
        options: TemplateChargerOptions,
        host: Arc<dyn Host>,
        logger: StructuredLogger,
    ) -> Result<Self> {
        let templates = [
            &options.charger_phase1,
            &options.charger_phase2,
            &options.charger_phase3,
        ];
        if templates.iter().any(|t| t.trim().is_empty()) {
            return Err(BalancerError::config("Charger phase templates cannot be empty"));
        }
        let phases = templates.map(|template| {
            Arc::new(ChargerPhase::new(
                ReadingSource::template(template.as_str()),
                host.clone(),
                logger.clone(),
            ))
        });
        Ok(Self {
            options,
            phases,
            host,
            logger,
        })
    }
}

#[async_trait::async_trait]
impl Charger for TemplateCharger {
    fn device_id(&self) -> Option<&str> {
        None
    }

    fn get_phase(&self, phase: Phase) -> Option<Arc<dyn ChargerPhaseReading>> {
        let reader: Arc<dyn ChargerPhaseReading> = self.phases[phase.index()].clone();
        Some(reader)
    }

    async fn get_rated_limit(&self) -> Option<u32> {
        let value = template_f64(
            &*self.host,
            &self.options.charger_limit,
            &TemplateVariables::new(),
            &self.logger,
        )
        .await;
        rated_from_reading(value, &self.logger)
    }

    async fn charging_state(&self) -> ChargingState {
        match template_bool(&*self.host, &self.options.charger_active, &self.logger).await {
            Some(true) => ChargingState::Charging,
            _ => ChargingState::Off,
        }
    }

    async fn set_limits(&self, phase1: f64, phase2: f64, phase3: f64) -> Result<()> {
        let limits = clamp_limits([phase1, phase2, phase3], &self.logger);
        let variables: TemplateVariables = ["phase1", "phase2", "phase3"]
            .into_iter()
            .zip(limits)
            .map(|(name, limit)| (name.to_string(), Value::from(limit)))
            .collect();

        let rendered = self
            .host
            .render(&self.options.charger_command, &variables)
            .await
            .map_err(|e| BalancerError::command(format!("Failed to render command: {}", e)))?;
        let command = RenderedCommand::from_rendered(rendered)?;
        let (domain, service) = command.split_service()?;

        self.logger.debug(&format!(
            "Setting limits {:.2}/{:.2}/{:.2} via {}",
            limits[0], limits[1], limits[2], command.service
        ));
        self.host
            .call_service(domain, service, command.data.clone())
            .await
            .map_err(|e| BalancerError::command(format!("{}: {}", command.service, e)))
    }

    async fn update(&self) {
        for phase in &self.phases {
            phase.update().await;
        }
    }

    fn cleanup(&mut self) {}
}
