//! Error types and handling for the load balancer
//!
//! This module defines the error types used throughout the crate. The
//! taxonomy separates fatal configuration problems from retryable setup and
//! host failures so callers can decide whether to try again later.

use thiserror::Error;

/// Result type alias for load balancer operations
pub type Result<T> = std::result::Result<T, BalancerError>;

/// Main error type for the load balancer
#[derive(Debug, Error)]
pub enum BalancerError {
    /// Invalid or unsupported configuration; never retried
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A setup dependency (rated limit, phase reading, device entity) is not available yet
    #[error("Setup error: {message}")]
    Setup { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Transport or API errors talking to the host platform
    #[error("Host error: {message}")]
    Host { message: String },

    /// Expression/template evaluation errors
    #[error("Template error: {message}")]
    Template { message: String },

    /// Charger command dispatch errors
    #[error("Command error: {message}")]
    Command { message: String },

    /// Automatic phase discovery failed
    #[error("Phase matching error: {message}")]
    PhaseMatching { message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl BalancerError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        BalancerError::Config {
            message: message.into(),
        }
    }

    /// Create a new (retryable) setup error
    pub fn setup<S: Into<String>>(message: S) -> Self {
        BalancerError::Setup {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        BalancerError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        BalancerError::Io {
            message: message.into(),
        }
    }

    /// Create a new host error
    pub fn host<S: Into<String>>(message: S) -> Self {
        BalancerError::Host {
            message: message.into(),
        }
    }

    /// Create a new template error
    pub fn template<S: Into<String>>(message: S) -> Self {
        BalancerError::Template {
            message: message.into(),
        }
    }

    /// Create a new command error
    pub fn command<S: Into<String>>(message: S) -> Self {
        BalancerError::Command {
            message: message.into(),
        }
    }

    /// Create a new phase matching error
    pub fn phase_matching<S: Into<String>>(message: S) -> Self {
        BalancerError::PhaseMatching {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        BalancerError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        BalancerError::Generic {
            message: message.into(),
        }
    }

    /// Whether the operation that produced this error may succeed when tried again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BalancerError::Setup { .. } | BalancerError::Host { .. } | BalancerError::Timeout { .. }
        )
    }
}

impl From<std::io::Error> for BalancerError {
    fn from(err: std::io::Error) -> Self {
        BalancerError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for BalancerError {
    fn from(err: serde_yaml::Error) -> Self {
        BalancerError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BalancerError {
    fn from(err: serde_json::Error) -> Self {
        BalancerError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "homeassistant")]
impl From<reqwest::Error> for BalancerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BalancerError::timeout(err.to_string())
        } else {
            BalancerError::host(err.to_string())
        }
    }
}
