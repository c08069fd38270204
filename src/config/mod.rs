//! # Deployer Configuration System
//!
//! Layered configuration for the orchestration core: compiled defaults, an
//! optional TOML file and `DEPLOYER_*` environment overrides, merged through the
//! `config` crate and validated before use.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use deployer_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let workers = manager.config().provisioning.max_workers;
//! let poll = manager.config().executor.poll_interval_short();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/deployer.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DeployerConfig {
    /// Remote run service endpoint and credentials
    pub service: ServiceConfig,

    /// Retry policy for transient run service failures
    pub backoff: BackoffConfig,

    /// Execution state machine settings
    pub executor: ExecutorConfig,

    /// Provisioning coordinator settings
    pub provisioning: ProvisioningConfig,
}

/// Remote run service connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    /// Run this process belongs to
    pub run_id: Option<Uuid>,
    pub api_key: String,
    pub api_key_header: String,
    pub bearer_token: String,
    pub timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            run_id: None,
            api_key: String::new(),
            api_key_header: "X-API-Key".to_string(),
            bearer_token: String::new(),
            timeout_ms: 30_000,
        }
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Exponential backoff settings (no jitter)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// Execution state machine settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Name of the node instance this process drives (`web.1`, `orchestrator-cloud`)
    pub instance_name: String,
    /// Poll interval while the run is mutable or instances await stopping
    pub poll_interval_short_ms: u64,
    /// Poll interval while the run is immutable and idle
    pub poll_interval_long_ms: u64,
    pub state_read_max_attempts: u32,
    pub state_read_initial_delay_ms: u64,
    pub state_read_max_delay_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            instance_name: String::new(),
            poll_interval_short_ms: 10_000,
            poll_interval_long_ms: 60_000,
            state_read_max_attempts: 8,
            state_read_initial_delay_ms: 1_000,
            state_read_max_delay_ms: 30_000,
        }
    }
}

impl ExecutorConfig {
    pub fn poll_interval_short(&self) -> Duration {
        Duration::from_millis(self.poll_interval_short_ms)
    }

    pub fn poll_interval_long(&self) -> Duration {
        Duration::from_millis(self.poll_interval_long_ms)
    }

    /// Backoff used for blocking reads of the global state
    pub fn state_read_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            max_attempts: self.state_read_max_attempts,
            initial_delay_ms: self.state_read_initial_delay_ms,
            max_delay_ms: self.state_read_max_delay_ms,
            multiplier: 2.0,
        }
    }
}

/// Provisioning coordinator settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Upper bound on concurrent provisioning workers
    pub max_workers: usize,
    /// User wait budget for instances to report back after start
    pub wait_timeout_seconds: u64,
    /// Fraction of the user budget actually spent waiting
    pub timeout_safety_factor: f64,
    /// Provider-side failure check cadence, in wait cycles
    pub failure_check_every: u32,
    pub poll_interval_ms: u64,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            wait_timeout_seconds: 1_800,
            timeout_safety_factor: 0.9,
            failure_check_every: 3,
            poll_interval_ms: 10_000,
        }
    }
}

impl ProvisioningConfig {
    /// Wait budget after applying the safety factor
    pub fn effective_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_seconds).mul_f64(self.timeout_safety_factor)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl DeployerConfig {
    /// Reject values the orchestration core cannot operate with
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.service.base_url.starts_with("http://")
            || self.service.base_url.starts_with("https://"))
        {
            return Err(ConfigurationError::invalid_value(
                "service.base_url",
                &self.service.base_url,
                "must be an http(s) URL",
            ));
        }
        if self.backoff.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "backoff.max_attempts",
                self.backoff.max_attempts,
                "at least one attempt is required",
            ));
        }
        if self.backoff.multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "backoff.multiplier",
                self.backoff.multiplier,
                "must be >= 1.0",
            ));
        }
        if self.executor.poll_interval_short_ms == 0
            || self.executor.poll_interval_short_ms > self.executor.poll_interval_long_ms
        {
            return Err(ConfigurationError::ValidationError {
                error: format!(
                    "executor poll intervals must satisfy 0 < short ({}) <= long ({})",
                    self.executor.poll_interval_short_ms, self.executor.poll_interval_long_ms
                ),
            });
        }
        if !self.executor.instance_name.is_empty() {
            if let Err(e) = crate::parameters::validate_instance_name(&self.executor.instance_name) {
                return Err(ConfigurationError::invalid_value(
                    "executor.instance_name",
                    &self.executor.instance_name,
                    e.to_string(),
                ));
            }
        }
        if self.executor.state_read_max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "executor.state_read_max_attempts",
                self.executor.state_read_max_attempts,
                "at least one attempt is required",
            ));
        }
        if self.provisioning.max_workers == 0 {
            return Err(ConfigurationError::invalid_value(
                "provisioning.max_workers",
                self.provisioning.max_workers,
                "at least one worker is required",
            ));
        }
        if !(self.provisioning.timeout_safety_factor > 0.0
            && self.provisioning.timeout_safety_factor <= 1.0)
        {
            return Err(ConfigurationError::invalid_value(
                "provisioning.timeout_safety_factor",
                self.provisioning.timeout_safety_factor,
                "must be in (0, 1]",
            ));
        }
        if self.provisioning.failure_check_every == 0 {
            return Err(ConfigurationError::invalid_value(
                "provisioning.failure_check_every",
                self.provisioning.failure_check_every,
                "must be positive",
            ));
        }
        Ok(())
    }
}
