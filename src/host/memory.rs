//! In-process host used for simulation and tests

use super::{
    EntityState, ServiceCaller, StatePublisher, StateStore, StateTracker, Subscription,
    TemplateRenderer, TemplateVariables,
};
use crate::error::{BalancerError, Result};
use crate::lock;
use crate::scheduler::RefreshRequester;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

type TemplateFn = Arc<dyn Fn(&TemplateVariables) -> Result<Value> + Send + Sync>;

/// A recorded service call
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub data: Value,
}

struct Tracker {
    entity_ids: HashSet<String>,
    refresh: RefreshRequester,
}

#[derive(Default)]
struct Inner {
    states: HashMap<String, EntityState>,
    devices: HashMap<String, Vec<String>>,
    templates: HashMap<String, TemplateFn>,
    service_calls: Vec<ServiceCall>,
    service_failure: Option<String>,
    published: HashMap<String, EntityState>,
    trackers: HashMap<u64, Tracker>,
    next_tracker: u64,
}

/// Host holding everything in memory
///
/// Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct MemoryHost {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an entity state without attributes
    pub fn set_state(&self, entity_id: &str, state: &str) {
        self.set_state_with_attributes(entity_id, state, Map::new());
    }

    /// Set an entity state and notify trackers of that entity
    pub fn set_state_with_attributes(
        &self,
        entity_id: &str,
        state: &str,
        attributes: Map<String, Value>,
    ) {
        let mut inner = lock(&self.inner);
        inner.states.insert(
            entity_id.to_string(),
            EntityState {
                entity_id: entity_id.to_string(),
                state: state.to_string(),
                attributes,
                last_updated: Utc::now(),
            },
        );
        for tracker in inner.trackers.values() {
            if tracker.entity_ids.contains(entity_id) {
                tracker.refresh.request_refresh();
            }
        }
    }

    pub fn remove_state(&self, entity_id: &str) {
        lock(&self.inner).states.remove(entity_id);
    }

    /// Register the entities belonging to a device
    pub fn add_device(&self, device_id: &str, entity_ids: &[&str]) {
        lock(&self.inner).devices.insert(
            device_id.to_string(),
            entity_ids.iter().map(|e| e.to_string()).collect(),
        );
    }

    /// Make `template` render to a fixed value
    pub fn set_template(&self, template: &str, value: impl Into<Value>) {
        let value = value.into();
        self.set_template_fn(template, move |_| Ok(value.clone()));
    }

    /// Make `template` render through a function of its variables
    pub fn set_template_fn<F>(&self, template: &str, render: F)
    where
        F: Fn(&TemplateVariables) -> Result<Value> + Send + Sync + 'static,
    {
        lock(&self.inner)
            .templates
            .insert(template.to_string(), Arc::new(render));
    }

    /// Make `template` fail to render
    pub fn fail_template(&self, template: &str, message: &str) {
        let message = message.to_string();
        self.set_template_fn(template, move |_| Err(BalancerError::template(message.clone())));
    }

    /// Make every subsequent service call fail with `message`; `None` restores success
    pub fn fail_services(&self, message: Option<&str>) {
        lock(&self.inner).service_failure = message.map(str::to_string);
    }

    pub fn service_calls(&self) -> Vec<ServiceCall> {
        lock(&self.inner).service_calls.clone()
    }

    pub fn published_state(&self, entity_id: &str) -> Option<EntityState> {
        lock(&self.inner).published.get(entity_id).cloned()
    }

    /// Number of live tracking subscriptions
    pub fn tracker_count(&self) -> usize {
        lock(&self.inner).trackers.len()
    }
}

#[async_trait::async_trait]
impl StateStore for MemoryHost {
    async fn get_state(&self, entity_id: &str) -> Result<Option<EntityState>> {
        Ok(lock(&self.inner).states.get(entity_id).cloned())
    }

    async fn device_entities(&self, device_id: &str) -> Result<Vec<String>> {
        Ok(lock(&self.inner)
            .devices
            .get(device_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl TemplateRenderer for MemoryHost {
    async fn render(&self, template: &str, variables: &TemplateVariables) -> Result<Value> {
        let render = lock(&self.inner).templates.get(template).cloned();
        match render {
            Some(render) => render(variables),
            None => Err(BalancerError::template(format!(
                "No result registered for template '{}'",
                template
            ))),
        }
    }
}

#[async_trait::async_trait]
impl ServiceCaller for MemoryHost {
    async fn call_service(&self, domain: &str, service: &str, data: Value) -> Result<()> {
        let mut inner = lock(&self.inner);
        if let Some(message) = &inner.service_failure {
            return Err(BalancerError::host(message.clone()));
        }
        inner.service_calls.push(ServiceCall {
            domain: domain.to_string(),
            service: service.to_string(),
            data,
        });
        Ok(())
    }
}

impl StateTracker for MemoryHost {
    fn track_state_changes(
        &self,
        entity_ids: &[String],
        refresh: RefreshRequester,
    ) -> Subscription {
        let mut inner = lock(&self.inner);
        let id = inner.next_tracker;
        inner.next_tracker += 1;
        inner.trackers.insert(
            id,
            Tracker {
                entity_ids: entity_ids.iter().cloned().collect(),
                refresh,
            },
        );

        let shared = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(shared) = shared.upgrade() {
                lock(&shared).trackers.remove(&id);
            }
        })
    }
}

#[async_trait::async_trait]
impl StatePublisher for MemoryHost {
    async fn publish_state(&self, entity_id: &str, state: &str, attributes: Value) -> Result<()> {
        let attributes = match attributes {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(BalancerError::generic(format!(
                    "Attributes must be an object, got {}",
                    other
                )));
            }
        };
        lock(&self.inner).published.insert(
            entity_id.to_string(),
            EntityState {
                entity_id: entity_id.to_string(),
                state: state.to_string(),
                attributes,
                last_updated: Utc::now(),
            },
        );
        Ok(())
    }
}
