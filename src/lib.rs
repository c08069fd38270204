#![allow(clippy::doc_markdown)] // Allow technical terms like OpenStack, VApp in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Deployer Core
//!
//! Orchestration core for multi-node deployment runs whose state lives in a
//! remote run service.
//!
//! ## Overview
//!
//! A run moves through global execution states (`Initializing`,
//! `Provisioning`, `Executing`, ...) driven by the run service. Every node
//! instance and every per-cloud orchestrator runs the same execution state
//! machine: read the global state, do the local work for it, signal
//! completion, wait for the next state. The orchestrator additionally starts,
//! stops and vertically scales instances through cloud connectors, tracks
//! per-instance scale states and tolerates a bounded number of provisioning
//! failures per node type.
//!
//! ## Module Organization
//!
//! - [`state_machine`] - Execution and scale state vocabulary
//! - [`execution`] - The execution state machine and its node/orchestrator roles
//! - [`orchestration`] - Scaling tracker, provisioning coordinator and actions
//! - [`parameters`] - Key qualification and the instance-scoped run wrapper
//! - [`client`] - Run service clients (HTTP and in-memory)
//! - [`cloud`] - Cloud connector contract and registry
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`resilience`] - Retry backoff
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deployer_core::client::HttpParameterStoreFactory;
//! use deployer_core::config::ConfigManager;
//! use deployer_core::execution::{node_executor, NoopHooks};
//! use deployer_core::parameters::RunWrapperFactory;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! deployer_core::logging::init_structured_logging();
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//!
//! let factory = Arc::new(HttpParameterStoreFactory::new(
//!     config.service.clone(),
//!     config.backoff.clone(),
//! ));
//! let wrapper = RunWrapperFactory::new(factory, config.executor.instance_name.clone()).create()?;
//!
//! let mut executor = node_executor(wrapper, Arc::new(NoopHooks), &config.executor);
//! executor.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod cloud;
pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod parameters;
pub mod resilience;
pub mod state_machine;

pub use client::{
    HttpParameterStore, HttpParameterStoreFactory, InMemoryRunService, ParameterStore,
    ParameterStoreFactory,
};
pub use cloud::{Capability, CapabilitySet, CloudConnector, ConnectorRegistry, UserInfo, VmHandle};
pub use config::{ConfigManager, DeployerConfig};
pub use error::{DeployerError, Result};
pub use execution::{
    node_executor, orchestrator_executor, ExecutionOutcome, ExecutionStateMachine, NodeHooks,
    OrchestratorContext,
};
pub use models::{NodeInstance, RunCategory, RunDocument};
pub use orchestration::{ProvisioningCoordinator, ScalingStateTracker};
pub use parameters::{qualify, KeyQualifier, RunWrapper, RunWrapperFactory};
pub use state_machine::{ExecutionState, HandlerOutcome, ScaleState};
