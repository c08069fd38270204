//! # Run Wrapper
//!
//! Instance-scoped facade over a [`ParameterStore`] client. Keys passed in are
//! qualified relative to the wrapped instance, the run document is cached until
//! [`RunWrapper::discard_cache`] is called, and the run-level helpers (global
//! state, abort flag, scale states, completion) live here so executors and the
//! orchestrator never build keys by hand.
//!
//! A wrapper owns its client. Concurrent workers each get their own wrapper from
//! a [`RunWrapperFactory`].

use super::qualifier::{is_orchestrator_name, validate_instance_name, KeyQualifier};
use crate::client::{ParameterStore, ParameterStoreFactory};
use crate::constants::{global_parameters, instance_parameters};
use crate::error::{DeployerError, Result};
use crate::models::{NodeInstance, RunDocument};
use crate::resilience::ExponentialBackoff;
use crate::state_machine::{ExecutionState, ScaleState};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct RunWrapper {
    store: Box<dyn ParameterStore>,
    qualifier: KeyQualifier,
    run_cache: Option<RunDocument>,
}

impl RunWrapper {
    pub fn new(store: Box<dyn ParameterStore>, instance_name: impl Into<String>) -> Self {
        Self {
            store,
            qualifier: KeyQualifier::new(instance_name),
            run_cache: None,
        }
    }

    pub fn instance_name(&self) -> &str {
        self.qualifier.instance_name()
    }

    pub fn qualifier(&self) -> &KeyQualifier {
        &self.qualifier
    }

    pub fn is_orchestrator(&self) -> bool {
        is_orchestrator_name(self.instance_name())
    }

    // ---- runtime parameters -------------------------------------------------

    pub async fn get_parameter(&mut self, key: &str) -> Result<Option<String>> {
        let key = self.qualifier.qualify(key);
        self.store.get_runtime_parameter(&key).await
    }

    pub async fn set_parameter(&mut self, key: &str, value: &str) -> Result<()> {
        let key = self.qualifier.qualify(key);
        self.store.set_runtime_parameter(&key, value).await
    }

    /// Reset a parameter to the empty value
    pub async fn unset_parameter(&mut self, key: &str) -> Result<()> {
        self.set_parameter(key, "").await
    }

    pub async fn delete_parameter(&mut self, key: &str) -> Result<()> {
        let key = self.qualifier.qualify(key);
        self.store.delete_runtime_parameter(&key).await
    }

    /// Wait for a parameter to be set, polling with `backoff`
    pub async fn get_parameter_blocking(
        &mut self,
        key: &str,
        backoff: &ExponentialBackoff,
    ) -> Result<String> {
        let qualified = self.qualifier.qualify(key);
        let mut waited = std::time::Duration::ZERO;
        for attempt in 0..backoff.max_attempts() {
            if let Some(value) = self.store.get_runtime_parameter(&qualified).await? {
                return Ok(value);
            }
            if attempt + 1 < backoff.max_attempts() {
                let delay = backoff.delay_for(attempt);
                debug!(key = %qualified, attempt = attempt + 1, "Parameter not set yet");
                tokio::time::sleep(delay).await;
                waited += delay;
            }
        }
        Err(DeployerError::timeout(format!("parameter {qualified}"), waited))
    }

    pub async fn get_instance_parameter(
        &mut self,
        instance_name: &str,
        property: &str,
    ) -> Result<Option<String>> {
        let key = self.qualifier.for_instance(instance_name, property);
        self.store.get_runtime_parameter(&key).await
    }

    pub async fn set_instance_parameter(
        &mut self,
        instance_name: &str,
        property: &str,
        value: &str,
    ) -> Result<()> {
        let key = self.qualifier.for_instance(instance_name, property);
        self.store.set_runtime_parameter(&key, value).await
    }

    // ---- global execution state ---------------------------------------------

    /// Read the global execution state, waiting with backoff while it is unset.
    /// Exhausted attempts surface as a timeout, unknown values as invalid state.
    pub async fn read_global_state(
        &mut self,
        backoff: &ExponentialBackoff,
    ) -> Result<ExecutionState> {
        let value = self
            .get_parameter_blocking(global_parameters::STATE, backoff)
            .await?;
        value
            .parse::<ExecutionState>()
            .map_err(DeployerError::InvalidState)
    }

    /// Signal that `instance_name` finished its work for the current phase
    pub async fn complete_state(&mut self, instance_name: &str) -> Result<()> {
        debug!(instance = instance_name, "Signalling phase complete");
        self.store.signal_phase_complete(instance_name).await
    }

    // ---- abort flag -----------------------------------------------------------

    pub async fn abort_message(&mut self) -> Result<Option<String>> {
        Ok(self
            .get_parameter(global_parameters::ABORT)
            .await?
            .filter(|message| !message.is_empty()))
    }

    pub async fn is_abort_set(&mut self) -> Result<bool> {
        Ok(self.abort_message().await?.is_some())
    }

    /// Record a failure on this instance and raise the global abort flag unless
    /// someone else raised it first.
    pub async fn fail(&mut self, message: &str) -> Result<()> {
        error!(
            instance = self.instance_name(),
            message = message,
            "Recording failure"
        );
        self.set_parameter(instance_parameters::ABORT, message).await?;
        if self.is_abort_set().await? {
            warn!(
                instance = self.instance_name(),
                "Abort flag already set, keeping first failure"
            );
            return Ok(());
        }
        let global = format!("{}: {}", self.instance_name(), message);
        self.set_parameter(global_parameters::ABORT, &global).await
    }

    // ---- run document ---------------------------------------------------------

    /// Cached run document, fetched on first use. Documents naming an
    /// instance that cannot be qualified are rejected.
    pub async fn run(&mut self) -> Result<&RunDocument> {
        if self.run_cache.is_none() {
            let run = self.store.get_run_document().await?;
            for instance in &run.instances {
                validate_instance_name(&instance.name)?;
                validate_instance_name(&instance.node_name)?;
            }
            self.run_cache = Some(run);
        }
        self.run_cache
            .as_ref()
            .ok_or_else(|| DeployerError::Internal("run cache empty after refresh".to_string()))
    }

    pub fn discard_cache(&mut self) {
        self.run_cache = None;
    }

    pub async fn is_mutable(&mut self) -> Result<bool> {
        Ok(self.run().await?.mutable)
    }

    /// Non-orchestrator instances of the cached run
    pub async fn node_instances(&mut self) -> Result<Vec<NodeInstance>> {
        Ok(self.run().await?.node_instances().cloned().collect())
    }

    /// The instance this wrapper acts for, if the run knows it
    pub async fn own_instance(&mut self) -> Result<Option<NodeInstance>> {
        let name = self.instance_name().to_string();
        Ok(self.run().await?.instance(&name).cloned())
    }

    // ---- scale state ----------------------------------------------------------

    /// Fresh scale state of an instance, bypassing the run cache
    pub async fn scale_state(&mut self, instance_name: &str) -> Result<Option<ScaleState>> {
        match self
            .get_instance_parameter(instance_name, instance_parameters::SCALE_STATE)
            .await?
        {
            Some(value) if !value.is_empty() => value
                .parse::<ScaleState>()
                .map(Some)
                .map_err(DeployerError::InvalidState),
            _ => Ok(None),
        }
    }

    pub async fn set_scale_state(&mut self, instance_name: &str, state: ScaleState) -> Result<()> {
        info!(instance = instance_name, scale_state = %state, "Setting scale state");
        self.set_instance_parameter(instance_name, instance_parameters::SCALE_STATE, state.as_str())
            .await?;
        if let Some(instance) = self
            .run_cache
            .as_mut()
            .and_then(|run| run.instance_mut(instance_name))
        {
            instance.scale_state = Some(state);
        }
        Ok(())
    }

    /// Remove instances of `node_name` by index
    pub async fn remove_instances(&mut self, node_name: &str, ids: &[u32]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        info!(node = node_name, ids = ?ids, "Removing instances");
        self.store.remove_instances(node_name, ids).await?;
        self.discard_cache();
        Ok(())
    }

    pub async fn delete_run(&mut self) -> Result<()> {
        self.store.delete_run().await
    }

    // ---- values published by the orchestrator --------------------------------

    pub async fn publish_instance_id(&mut self, instance_name: &str, id: &str) -> Result<()> {
        self.set_instance_parameter(instance_name, instance_parameters::INSTANCE_ID, id)
            .await
    }

    pub async fn publish_hostname(&mut self, instance_name: &str, hostname: &str) -> Result<()> {
        self.set_instance_parameter(instance_name, instance_parameters::HOSTNAME, hostname)
            .await
    }

    pub async fn publish_attached_device(&mut self, instance_name: &str, device: &str) -> Result<()> {
        self.set_instance_parameter(instance_name, instance_parameters::DISK_ATTACHED_DEVICE, device)
            .await
    }

    /// Provider resource id of an instance: the published `instanceid`, falling
    /// back to what the run document knows
    pub async fn instance_id(&mut self, instance_name: &str) -> Result<Option<String>> {
        if let Some(id) = self
            .get_instance_parameter(instance_name, instance_parameters::INSTANCE_ID)
            .await?
            .filter(|id| !id.is_empty())
        {
            return Ok(Some(id));
        }
        Ok(self
            .run()
            .await?
            .instance(instance_name)
            .and_then(|instance| instance.cloud_resource_id.clone()))
    }
}

/// Builds one [`RunWrapper`] per caller, each with its own client
#[derive(Debug, Clone)]
pub struct RunWrapperFactory {
    store_factory: Arc<dyn ParameterStoreFactory>,
    instance_name: String,
}

impl RunWrapperFactory {
    pub fn new(store_factory: Arc<dyn ParameterStoreFactory>, instance_name: impl Into<String>) -> Self {
        Self {
            store_factory,
            instance_name: instance_name.into(),
        }
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn create(&self) -> Result<RunWrapper> {
        validate_instance_name(&self.instance_name)?;
        Ok(RunWrapper::new(
            self.store_factory.create()?,
            self.instance_name.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryRunService;
    use crate::config::BackoffConfig;
    use crate::models::RunCategory;
    use uuid::Uuid;

    fn service() -> InMemoryRunService {
        let mut run = RunDocument::new(Uuid::new_v4(), RunCategory::Deployment);
        run.instances.push(NodeInstance::orchestrator("cloud-a"));
        run.instances.push(NodeInstance::new("web", 1, "cloud-a"));
        run.instances.push(NodeInstance::new("web", 2, "cloud-a"));
        InMemoryRunService::new(run)
    }

    fn fast_backoff(max_attempts: u32) -> ExponentialBackoff {
        ExponentialBackoff::from_config(&BackoffConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
        })
    }

    #[tokio::test]
    async fn test_keys_are_qualified_for_instance() {
        let service = service();
        let mut wrapper = RunWrapper::new(Box::new(service.client()), "web.2");

        wrapper.set_parameter("hostname", "10.0.0.2").await.unwrap();
        assert_eq!(service.parameter("web.2:hostname").as_deref(), Some("10.0.0.2"));

        wrapper.set_parameter("ids", "1,2").await.unwrap();
        assert_eq!(service.parameter("web:ids").as_deref(), Some("1,2"));
    }

    #[tokio::test]
    async fn test_read_global_state() {
        let service = service();
        let mut wrapper = RunWrapper::new(Box::new(service.client()), "web.1");

        let result = wrapper.read_global_state(&fast_backoff(3)).await;
        assert!(matches!(result, Err(DeployerError::Timeout { .. })));

        service.set_global_state(ExecutionState::Provisioning);
        assert_eq!(
            wrapper.read_global_state(&fast_backoff(3)).await.unwrap(),
            ExecutionState::Provisioning
        );

        service.set_parameter("ss:state", "Sideways");
        assert!(matches!(
            wrapper.read_global_state(&fast_backoff(3)).await,
            Err(DeployerError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_fail_keeps_first_abort_message() {
        let service = service();
        let mut first = RunWrapper::new(Box::new(service.client()), "web.1");
        let mut second = RunWrapper::new(Box::new(service.client()), "web.2");

        assert!(!first.is_abort_set().await.unwrap());
        first.fail("disk full").await.unwrap();
        second.fail("timeout").await.unwrap();

        assert_eq!(service.parameter("web.1:abort").as_deref(), Some("disk full"));
        assert_eq!(service.parameter("web.2:abort").as_deref(), Some("timeout"));
        assert_eq!(
            first.abort_message().await.unwrap().as_deref(),
            Some("web.1: disk full")
        );
    }

    #[tokio::test]
    async fn test_empty_abort_is_not_set() {
        let service = service();
        service.set_parameter("ss:abort", "");
        let mut wrapper = RunWrapper::new(Box::new(service.client()), "web.1");
        assert!(!wrapper.is_abort_set().await.unwrap());
    }

    #[tokio::test]
    async fn test_run_cache_and_scale_state() {
        let service = service();
        let mut wrapper = RunWrapper::new(Box::new(service.client()), "orchestrator-cloud-a");
        assert!(wrapper.is_orchestrator());
        assert_eq!(wrapper.node_instances().await.unwrap().len(), 2);

        service.set_scale_state("web.1", ScaleState::Created);
        // cached document is stale, direct reads are not
        let cached = wrapper.run().await.unwrap().instance("web.1").unwrap().scale_state;
        assert_eq!(cached, Some(ScaleState::Creating));
        assert_eq!(
            wrapper.scale_state("web.1").await.unwrap(),
            Some(ScaleState::Created)
        );

        wrapper.discard_cache();
        let refreshed = wrapper.run().await.unwrap().instance("web.1").unwrap().scale_state;
        assert_eq!(refreshed, Some(ScaleState::Created));

        wrapper.set_scale_state("web.2", ScaleState::Removing).await.unwrap();
        let cached = wrapper.run().await.unwrap().instance("web.2").unwrap().scale_state;
        assert_eq!(cached, Some(ScaleState::Removing));
    }

    #[tokio::test]
    async fn test_factory_creates_separate_clients() {
        let service = service();
        let factory = RunWrapperFactory::new(service.factory(), "orchestrator-cloud-a");
        let _first = factory.create().unwrap();
        let _second = factory.create().unwrap();
        assert_eq!(service.clients_created(), 2);
    }

    #[tokio::test]
    async fn test_unqualifiable_names_are_rejected() {
        let service = service();
        let factory = RunWrapperFactory::new(service.factory(), "web:1");
        assert!(matches!(
            factory.create(),
            Err(DeployerError::InvalidInstanceName { .. })
        ));

        let mut run = RunDocument::new(Uuid::new_v4(), RunCategory::Deployment);
        let mut broken = NodeInstance::new("web", 1, "cloud-a");
        broken.name = "web:1".to_string();
        run.instances.push(broken);
        let service = InMemoryRunService::new(run);
        let mut wrapper = RunWrapper::new(Box::new(service.client()), "web.1");
        let err = wrapper.node_instances().await.unwrap_err();
        assert!(err.to_string().contains("web:1"));
    }
}
