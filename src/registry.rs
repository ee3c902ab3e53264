//! Live coordinators keyed by entry id
//!
//! Coordinators are inserted once their setup succeeds and removed when the
//! entry is unloaded. The registry is owned by the service; there is no
//! process-wide instance.

use crate::coordinator::Coordinator;
use crate::error::{BalancerError, Result};
use crate::lock;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Shared handle to a running coordinator
pub type CoordinatorHandle = Arc<tokio::sync::Mutex<Coordinator>>;

#[derive(Default)]
pub struct CoordinatorRegistry {
    coordinators: Mutex<BTreeMap<String, CoordinatorHandle>>,
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a coordinator; an entry id may only be registered once
    pub fn insert(&self, coordinator: Coordinator) -> Result<CoordinatorHandle> {
        let entry_id = coordinator.entry_id().to_string();
        let mut coordinators = lock(&self.coordinators);
        if coordinators.contains_key(&entry_id) {
            return Err(BalancerError::config(format!(
                "Entry '{}' is already loaded",
                entry_id
            )));
        }
        let handle = Arc::new(tokio::sync::Mutex::new(coordinator));
        coordinators.insert(entry_id, handle.clone());
        Ok(handle)
    }

    pub fn get(&self, entry_id: &str) -> Option<CoordinatorHandle> {
        lock(&self.coordinators).get(entry_id).cloned()
    }

    pub fn contains(&self, entry_id: &str) -> bool {
        lock(&self.coordinators).contains_key(entry_id)
    }

    pub fn entry_ids(&self) -> Vec<String> {
        lock(&self.coordinators).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.coordinators).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove an entry and shut its coordinator down
    pub async fn unload(&self, entry_id: &str) -> bool {
        let removed = lock(&self.coordinators).remove(entry_id);
        match removed {
            Some(handle) => {
                handle.lock().await.shutdown();
                true
            }
            None => false,
        }
    }

    /// Unload every entry
    pub async fn unload_all(&self) {
        for entry_id in self.entry_ids() {
            self.unload(&entry_id).await;
        }
    }
}
