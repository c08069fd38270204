//! # Run Service Client Traits
//!
//! The remote run service is the single source of truth for runtime parameters
//! and run topology. Clients take `&mut self`: a client is a single connection
//! and must not be shared between concurrent units of work. Concurrent callers
//! obtain their own client from a [`ParameterStoreFactory`] built once from the
//! shared, immutable service configuration.

use crate::error::Result;
use crate::models::RunDocument;
use async_trait::async_trait;
use std::fmt::Debug;

/// Key/value and run-document operations against the remote run service.
///
/// All keys are fully qualified; qualification happens in
/// [`RunWrapper`](crate::parameters::RunWrapper).
#[async_trait]
pub trait ParameterStore: Send + Debug {
    /// Read a runtime parameter; `None` when it has not been set yet
    async fn get_runtime_parameter(&mut self, key: &str) -> Result<Option<String>>;

    async fn set_runtime_parameter(&mut self, key: &str, value: &str) -> Result<()>;

    async fn delete_runtime_parameter(&mut self, key: &str) -> Result<()>;

    /// Structured run state: instances, node types, global parameters
    async fn get_run_document(&mut self) -> Result<RunDocument>;

    /// Tell the service `instance_name` finished its local work for the current phase
    async fn signal_phase_complete(&mut self, instance_name: &str) -> Result<()>;

    /// Remove instances of `node_name` by multiplicity index
    async fn remove_instances(&mut self, node_name: &str, ids: &[u32]) -> Result<()>;

    async fn delete_run(&mut self) -> Result<()>;
}

/// Builds independent [`ParameterStore`] clients bound to the same credentials
pub trait ParameterStoreFactory: Send + Sync + Debug {
    fn create(&self) -> Result<Box<dyn ParameterStore>>;
}
