//! Error types for the deployment orchestration core.
//!

use crate::config::ConfigurationError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployerError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Non-transient failure talking to the remote run service
    #[error("Run service error during {operation}: {reason}")]
    Service { operation: String, reason: String },
    #[error("Timeout waiting for {operation} after {waited:?}")]
    Timeout { operation: String, waited: Duration },
    /// Scaling invariants were violated; never corrected automatically
    #[error("Inconsistent scaling state: {0}")]
    InconsistentState(String),
    #[error(
        "Provisioning failures exceeded for node '{node}': {failed} failed, {tolerated} tolerated"
    )]
    ProvisioningFailureExceeded {
        node: String,
        failed: usize,
        tolerated: u32,
    },
    #[error("Cloud connector '{cloud}' failed: {reason}")]
    Cloud { cloud: String, reason: String },
    #[error("Operation '{operation}' is not implemented by connector '{connector}'")]
    NotImplemented { connector: String, operation: String },
    /// The connector does not declare the capability an operation needs
    #[error("Cloud '{cloud}' does not support {capability}")]
    Unsupported { cloud: String, capability: String },
    #[error("No handler registered for state {state}")]
    MissingHandler { state: String },
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid instance name '{name}': {reason}")]
    InvalidInstanceName { name: String, reason: String },
    /// Local termination request; not a run failure
    #[error("Shutdown requested")]
    Shutdown,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployerError {
    pub fn service(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Service {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn cloud(cloud: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cloud {
            cloud: cloud.into(),
            reason: reason.into(),
        }
    }

    pub fn not_implemented(connector: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::NotImplemented {
            connector: connector.into(),
            operation: operation.into(),
        }
    }

    pub fn unsupported(cloud: impl Into<String>, capability: impl std::fmt::Display) -> Self {
        Self::Unsupported {
            cloud: cloud.into(),
            capability: capability.to_string(),
        }
    }

    pub fn timeout(operation: impl Into<String>, waited: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            waited,
        }
    }

    /// Whether this error is a local termination request rather than a failure
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

impl From<ConfigurationError> for DeployerError {
    fn from(error: ConfigurationError) -> Self {
        DeployerError::Configuration(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DeployerError>;
