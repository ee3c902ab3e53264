//! Host platform abstraction
//!
//! The balancer runs against a home-automation host that owns the entity
//! state store, the template engine, service dispatch and change
//! notifications. These capabilities are split into small traits so
//! backends only depend on what they use; [`Host`] bundles all of them.

use crate::error::Result;
use crate::scheduler::RefreshRequester;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub mod memory;
#[cfg(feature = "homeassistant")]
pub mod rest;

/// Variables passed to a template render
pub type TemplateVariables = BTreeMap<String, Value>;

/// Snapshot of one host entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub last_updated: DateTime<Utc>,
}

impl EntityState {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Map::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

/// Read access to entity states and the device registry
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    /// Current state of an entity; `Ok(None)` when it does not exist
    async fn get_state(&self, entity_id: &str) -> Result<Option<EntityState>>;

    /// Entity ids belonging to a device
    async fn device_entities(&self, device_id: &str) -> Result<Vec<String>>;
}

/// Expression evaluation against live host state
#[async_trait::async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(&self, template: &str, variables: &TemplateVariables) -> Result<Value>;
}

/// Host service dispatch
#[async_trait::async_trait]
pub trait ServiceCaller: Send + Sync {
    async fn call_service(&self, domain: &str, service: &str, data: Value) -> Result<()>;
}

/// Change notifications for a set of entities
pub trait StateTracker: Send + Sync {
    /// Request a refresh through `refresh` whenever one of `entity_ids` changes
    fn track_state_changes(&self, entity_ids: &[String], refresh: RefreshRequester)
    -> Subscription;
}

/// Write access for diagnostic entities
#[async_trait::async_trait]
pub trait StatePublisher: Send + Sync {
    async fn publish_state(&self, entity_id: &str, state: &str, attributes: Value) -> Result<()>;
}

/// Everything a coordinator needs from the host
pub trait Host: StateStore + TemplateRenderer + ServiceCaller + StateTracker + StatePublisher {}

impl<T> Host for T where
    T: StateStore + TemplateRenderer + ServiceCaller + StateTracker + StatePublisher
{
}

/// Live change tracking registration; released on `release()` or drop
#[must_use = "dropping a subscription stops change tracking"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscription_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let mut sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(sub.is_active());
        sub.release();
        sub.release();
        drop(sub);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_releases_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        {
            let _sub = Subscription::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn entity_state_parses_host_json() {
        let json = r#"{
            "entity_id": "sensor.charger_status",
            "state": "charging",
            "attributes": {"friendly_name": "Status"},
            "last_changed": "2024-05-01T10:00:00+00:00",
            "last_updated": "2024-05-01T10:00:00+00:00"
        }"#;
        let state: EntityState = serde_json::from_str(json).unwrap();
        assert_eq!(state.state, "charging");
        assert_eq!(
            state.attribute("friendly_name"),
            Some(&Value::from("Status"))
        );
    }
}
