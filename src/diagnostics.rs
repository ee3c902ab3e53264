//! Last-update observability
//!
//! [`UpdateStatus`] is the shared record of successful limit applies. The
//! coordinator writes it; observers hold a clone and re-read it after being
//! notified. [`DiagnosticsPublisher`] mirrors it into two host sensors.

use crate::error::Result;
use crate::host::Host;
use crate::lock;
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Serialisable view of an entry's update history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub entry_id: String,
    pub name: String,
    pub last_update: Option<DateTime<Utc>>,
    /// Whole seconds between the two most recent applies
    pub update_age_seconds: Option<i64>,
    pub last_limits: Option<[f64; 3]>,
}

#[derive(Debug, Default)]
struct UpdateRecord {
    last_update: Option<DateTime<Utc>>,
    previous_update: Option<DateTime<Utc>>,
    last_limits: Option<[f64; 3]>,
}

/// Shared record of successful applies
#[derive(Debug, Clone)]
pub struct UpdateStatus {
    entry_id: String,
    name: String,
    record: Arc<Mutex<UpdateRecord>>,
}

impl UpdateStatus {
    pub fn new(entry_id: &str, name: &str) -> Self {
        Self {
            entry_id: entry_id.to_string(),
            name: name.to_string(),
            record: Arc::new(Mutex::new(UpdateRecord::default())),
        }
    }

    pub(crate) fn record(&self, at: DateTime<Utc>, limits: [f64; 3]) {
        let mut record = lock(&self.record);
        record.previous_update = record.last_update.replace(at);
        record.last_limits = Some(limits);
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        lock(&self.record).last_update
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let record = lock(&self.record);
        DiagnosticsSnapshot {
            entry_id: self.entry_id.clone(),
            name: self.name.clone(),
            last_update: record.last_update,
            update_age_seconds: match (record.previous_update, record.last_update) {
                (Some(previous), Some(last)) => Some((last - previous).num_seconds()),
                _ => None,
            },
            last_limits: record.last_limits,
        }
    }
}

/// Publishes `sensor.<slug>_last_update` and `sensor.<slug>_update_age`
pub struct DiagnosticsPublisher {
    host: Arc<dyn Host>,
    slug: String,
    logger: StructuredLogger,
}

impl DiagnosticsPublisher {
    pub fn new(host: Arc<dyn Host>, entry_id: &str, slug: &str) -> Self {
        Self {
            host,
            slug: slug.to_string(),
            logger: get_logger_with_context(LogContext::new("diagnostics").with_entry(entry_id)),
        }
    }

    pub fn last_update_entity(&self) -> String {
        format!("sensor.{}_last_update", self.slug)
    }

    pub fn update_age_entity(&self) -> String {
        format!("sensor.{}_update_age", self.slug)
    }

    pub async fn publish(&self, snapshot: &DiagnosticsSnapshot) -> Result<()> {
        let last_update = snapshot
            .last_update
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        self.host
            .publish_state(
                &self.last_update_entity(),
                &last_update,
                json!({
                    "friendly_name": format!("{} Last update", snapshot.name),
                    "device_class": "timestamp",
                }),
            )
            .await?;

        let age = snapshot
            .update_age_seconds
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        self.host
            .publish_state(
                &self.update_age_entity(),
                &age,
                json!({
                    "friendly_name": format!("{} Update age", snapshot.name),
                    "unit_of_measurement": "s",
                    "state_class": "measurement",
                }),
            )
            .await?;

        self.logger
            .trace(&format!("Published diagnostics: last_update={}, age={}", last_update, age));
        Ok(())
    }
}
