//! Easee charger controlled through its dynamic circuit limit

use super::{
    Charger, ChargerPhase, ChargerPhaseReading, EaseeOptions, clamp_limits, rated_from_reading,
};
use crate::error::{BalancerError, Result};
use crate::host::{Host, Subscription};
use crate::logging::StructuredLogger;
use crate::phase::{ChargingState, Phase};
use crate::reading::ReadingSource;
use crate::scheduler::RefreshRequester;
use serde_json::json;
use std::sync::Arc;

const SERVICE_DOMAIN: &str = "easee";
const SET_CIRCUIT_LIMIT: &str = "set_circuit_dynamic_limit";
const PHASE_ATTRIBUTES: [&str; 3] = [
    "state_dynamicCircuitCurrentP1",
    "state_dynamicCircuitCurrentP2",
    "state_dynamicCircuitCurrentP3",
];
const RATED_ATTRIBUTE: &str = "circuit_ratedCurrent";

/// Map the status entity value to a charging state
pub fn charging_state_from_status(status: &str) -> ChargingState {
    match status {
        "charging" => ChargingState::Charging,
        "awaiting_start" => ChargingState::Pending,
        _ => ChargingState::Off,
    }
}

pub struct EaseeCharger {
    device_id: String,
    ttl: u32,
    status_entity: String,
    circuit_entity: String,
    phases: [Arc<ChargerPhase>; 3],
    host: Arc<dyn Host>,
    subscriptions: Vec<Subscription>,
    logger: StructuredLogger,
}

impl EaseeCharger {
    /// Discover the charger entities and start tracking them
    pub async fn connect(
        options: &EaseeOptions,
        host: Arc<dyn Host>,
        refresh: RefreshRequester,
        logger: StructuredLogger,
    ) -> Result<Self> {
        let entities = host.device_entities(&options.device_id).await?;
        let find = |suffix: &str| {
            entities
                .iter()
                .find(|e| e.ends_with(suffix))
                .cloned()
                .ok_or_else(|| {
                    BalancerError::setup(format!(
                        "Charger device {} has no *{} entity",
                        options.device_id, suffix
                    ))
                })
        };
        let status_entity = find("_status")?;
        let circuit_entity = find("_dynamic_circuit_limit")?;

        let subscriptions = vec![
            host.track_state_changes(std::slice::from_ref(&status_entity), refresh.clone()),
            host.track_state_changes(std::slice::from_ref(&circuit_entity), refresh),
        ];

        let phases = PHASE_ATTRIBUTES.map(|attribute| {
            Arc::new(ChargerPhase::new(
                ReadingSource::attribute(circuit_entity.clone(), attribute),
                host.clone(),
                logger.clone(),
            ))
        });

        logger.info(&format!(
            "Easee charger {} ready: status {}, circuit {}",
            options.device_id, status_entity, circuit_entity
        ));

        Ok(Self {
            device_id: options.device_id.clone(),
            ttl: options.expires,
            status_entity,
            circuit_entity,
            phases,
            host,
            subscriptions,
            logger,
        })
    }

    pub fn is_tracking(&self) -> bool {
        self.subscriptions.iter().any(Subscription::is_active)
    }
}

#[async_trait::async_trait]
impl Charger for EaseeCharger {
    fn device_id(&self) -> Option<&str> {
        Some(&self.device_id)
    }

    fn get_phase(&self, phase: Phase) -> Option<Arc<dyn ChargerPhaseReading>> {
        let reader: Arc<dyn ChargerPhaseReading> = self.phases[phase.index()].clone();
        Some(reader)
    }

    async fn get_rated_limit(&self) -> Option<u32> {
        let value = ReadingSource::attribute(self.circuit_entity.clone(), RATED_ATTRIBUTE)
            .read_f64(&*self.host, &self.logger)
            .await;
        rated_from_reading(value, &self.logger)
    }

    async fn charging_state(&self) -> ChargingState {
        match self.host.get_state(&self.status_entity).await {
            Ok(Some(state)) => charging_state_from_status(&state.state),
            Ok(None) => {
                self.logger
                    .warn(&format!("Status entity {} does not exist", self.status_entity));
                ChargingState::Off
            }
            Err(e) => {
                self.logger.error(&format!(
                    "Failed to read status entity {}: {}",
                    self.status_entity, e
                ));
                ChargingState::Off
            }
        }
    }

    async fn set_limits(&self, phase1: f64, phase2: f64, phase3: f64) -> Result<()> {
        let [p1, p2, p3] = clamp_limits([phase1, phase2, phase3], &self.logger);
        self.logger.debug(&format!(
            "Setting limits: phase 1 {:.2}, phase 2 {:.2}, phase 3 {:.2}",
            p1, p2, p3
        ));
        let data = json!({
            "device_id": self.device_id,
            "current_p1": p1,
            "current_p2": p2,
            "current_p3": p3,
            "time_to_live": self.ttl,
        });
        self.host
            .call_service(SERVICE_DOMAIN, SET_CIRCUIT_LIMIT, data)
            .await
            .map_err(|e| BalancerError::command(format!("{}.{}: {}", SERVICE_DOMAIN, SET_CIRCUIT_LIMIT, e)))
    }

    async fn update(&self) {
        for phase in &self.phases {
            phase.update().await;
        }
    }

    fn cleanup(&mut self) {
        for mut subscription in self.subscriptions.drain(..) {
            subscription.release();
        }
        self.logger.debug("Released charger change tracking");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryHost;
    use crate::logging::get_logger;
    use serde_json::{Map, Value};

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn charger_is_shareable_across_tasks() {
        assert_send_sync::<EaseeCharger>();
        assert_send_sync::<Subscription>();
    }

    fn circuit_attributes(p: [f64; 3], rated: f64) -> Map<String, Value> {
        let mut map = Map::new();
        for (attr, v) in PHASE_ATTRIBUTES.iter().zip(p) {
            map.insert(attr.to_string(), Value::from(v));
        }
        map.insert(RATED_ATTRIBUTE.to_string(), Value::from(rated));
        map
    }

    async fn connected(host: &MemoryHost) -> EaseeCharger {
        host.add_device(
            "charger",
            &[
                "sensor.ehxxx_power",
                "sensor.ehxxx_status",
                "sensor.ehxxx_dynamic_circuit_limit",
            ],
        );
        EaseeCharger::connect(
            &EaseeOptions {
                device_id: "charger".to_string(),
                expires: 10,
            },
            Arc::new(host.clone()),
            RefreshRequester::detached(),
            get_logger("test"),
        )
        .await
        .unwrap()
    }

    #[test]
    fn status_mapping() {
        assert_eq!(charging_state_from_status("charging"), ChargingState::Charging);
        assert_eq!(charging_state_from_status("awaiting_start"), ChargingState::Pending);
        assert_eq!(charging_state_from_status("completed"), ChargingState::Off);
    }

    #[tokio::test]
    async fn reads_limits_and_state() {
        let host = MemoryHost::new();
        let mut charger = connected(&host).await;
        assert_eq!(host.tracker_count(), 2);

        host.set_state("sensor.ehxxx_status", "awaiting_start");
        host.set_state_with_attributes(
            "sensor.ehxxx_dynamic_circuit_limit",
            "16",
            circuit_attributes([10.0, 11.0, 12.0], 25.0),
        );

        charger.update().await;
        assert_eq!(
            charger.get_phase(Phase::Phase3).unwrap().current_limit(),
            Some(12.0)
        );
        assert_eq!(charger.get_rated_limit().await, Some(25));
        assert_eq!(charger.charging_state().await, ChargingState::Pending);

        charger.cleanup();
        assert!(!charger.is_tracking());
        assert_eq!(host.tracker_count(), 0);
    }

    #[tokio::test]
    async fn set_limits_calls_service() {
        let host = MemoryHost::new();
        let charger = connected(&host).await;

        charger.set_limits(12.0, 16.0, -1.0).await.unwrap();
        let calls = host.service_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].domain, "easee");
        assert_eq!(calls[0].service, "set_circuit_dynamic_limit");
        assert_eq!(
            calls[0].data,
            json!({
                "device_id": "charger",
                "current_p1": 12.0,
                "current_p2": 16.0,
                "current_p3": 0.0,
                "time_to_live": 10,
            })
        );

        host.fail_services(Some("unreachable"));
        assert!(matches!(
            charger.set_limits(1.0, 1.0, 1.0).await,
            Err(BalancerError::Command { .. })
        ));
    }

    #[tokio::test]
    async fn missing_entities_are_retryable() {
        let host = MemoryHost::new();
        host.add_device("charger", &["sensor.ehxxx_status"]);
        let result = EaseeCharger::connect(
            &EaseeOptions {
                device_id: "charger".to_string(),
                expires: 10,
            },
            Arc::new(host),
            RefreshRequester::detached(),
            get_logger("test"),
        )
        .await;
        assert!(result.is_err_and(|e| e.is_retryable()));
    }
}
