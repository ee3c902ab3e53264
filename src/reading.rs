//! Conversion of host values into ampere readings
//!
//! Lookups never fail outward: an unparsable value is logged as a warning,
//! a failing lookup as an error, and both yield `None`.

use crate::host::{Host, TemplateVariables};
use crate::logging::StructuredLogger;
use serde_json::Value;

/// Where a single numeric reading comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadingSource {
    /// The state value of an entity
    EntityState { entity_id: String },
    /// A named attribute of an entity
    Attribute { entity_id: String, attribute: String },
    /// A rendered expression
    Template { template: String },
}

impl ReadingSource {
    pub fn entity(entity_id: impl Into<String>) -> Self {
        ReadingSource::EntityState {
            entity_id: entity_id.into(),
        }
    }

    pub fn attribute(entity_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        ReadingSource::Attribute {
            entity_id: entity_id.into(),
            attribute: attribute.into(),
        }
    }

    pub fn template(template: impl Into<String>) -> Self {
        ReadingSource::Template {
            template: template.into(),
        }
    }

    /// Human readable description used in log messages
    pub fn describe(&self) -> String {
        match self {
            ReadingSource::EntityState { entity_id } => entity_id.clone(),
            ReadingSource::Attribute {
                entity_id,
                attribute,
            } => format!("{} ({})", attribute, entity_id),
            ReadingSource::Template { template } => template.clone(),
        }
    }

    /// Entity whose changes should trigger a refresh, if any
    pub fn tracked_entity(&self) -> Option<&str> {
        match self {
            ReadingSource::EntityState { entity_id }
            | ReadingSource::Attribute { entity_id, .. } => Some(entity_id.as_str()),
            ReadingSource::Template { .. } => None,
        }
    }

    /// Fetch the current value as a finite number
    pub async fn read_f64<H: Host + ?Sized>(
        &self,
        host: &H,
        logger: &StructuredLogger,
    ) -> Option<f64> {
        match self {
            ReadingSource::EntityState { entity_id } => {
                entity_value(host, entity_id, None, logger).await
            }
            ReadingSource::Attribute {
                entity_id,
                attribute,
            } => entity_value(host, entity_id, Some(attribute), logger).await,
            ReadingSource::Template { template } => {
                template_f64(host, template, &TemplateVariables::new(), logger).await
            }
        }
    }
}

async fn entity_value<H: Host + ?Sized>(
    host: &H,
    entity_id: &str,
    attribute: Option<&str>,
    logger: &StructuredLogger,
) -> Option<f64> {
    let state = match host.get_state(entity_id).await {
        Ok(Some(state)) => state,
        Ok(None) => {
            logger.warn(&format!("Entity {} does not exist", entity_id));
            return None;
        }
        Err(e) => {
            logger.error(&format!("Failed to look up {}: {}", entity_id, e));
            return None;
        }
    };

    let parsed = match attribute {
        Some(attribute) => match state.attribute(attribute) {
            Some(value) => value_as_f64(value),
            None => {
                logger.warn(&format!(
                    "Entity {} has no attribute {}",
                    entity_id, attribute
                ));
                return None;
            }
        },
        None => parse_f64(&state.state),
    };

    if parsed.is_none() {
        logger.warn(&format!(
            "Could not parse value of {}{} (state '{}')",
            entity_id,
            attribute.map(|a| format!(" attribute {}", a)).unwrap_or_default(),
            state.state
        ));
    }
    parsed
}

/// Render `template` and interpret the result as a number
pub async fn template_f64<H: Host + ?Sized>(
    host: &H,
    template: &str,
    variables: &TemplateVariables,
    logger: &StructuredLogger,
) -> Option<f64> {
    match host.render(template, variables).await {
        Ok(value) => {
            let parsed = value_as_f64(&value);
            if parsed.is_none() {
                logger.warn(&format!(
                    "Template '{}' rendered non-numeric value {}",
                    template, value
                ));
            }
            parsed
        }
        Err(e) => {
            logger.error(&format!("Failed to render template '{}': {}", template, e));
            None
        }
    }
}

/// Render `template` and interpret the result as a boolean
pub async fn template_bool<H: Host + ?Sized>(
    host: &H,
    template: &str,
    logger: &StructuredLogger,
) -> Option<bool> {
    match host.render(template, &TemplateVariables::new()).await {
        Ok(value) => {
            let parsed = value_as_bool(&value);
            if parsed.is_none() {
                logger.warn(&format!(
                    "Template '{}' rendered non-boolean value {}",
                    template, value
                ));
            }
            parsed
        }
        Err(e) => {
            logger.error(&format!("Failed to render template '{}': {}", template, e));
            None
        }
    }
}

/// Parse a textual state into a finite number
pub fn parse_f64(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Interpret a JSON value as a finite number
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_f64(s),
        _ => None,
    }
}

/// Interpret a JSON value as a boolean
pub fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "on" | "yes" | "1" => Some(true),
            "false" | "off" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
