//! # In-Memory Run Service
//!
//! A process-local stand-in for the remote run service. The service state lives
//! behind one lock and every [`InMemoryParameterStore`] handed out is an
//! independent client against it, the same way HTTP clients share a server.
//!
//! Run documents returned to clients reflect the per-instance runtime
//! parameters (`scale.state`, `instanceid`, `hostname`) so orchestration code
//! sees the same picture a real service would give it.

use super::traits::{ParameterStore, ParameterStoreFactory};
use crate::constants::{global_parameters, instance_parameters};
use crate::error::{DeployerError, Result};
use crate::models::{NodeInstance, RunDocument};
use crate::parameters::qualify;
use crate::state_machine::{ExecutionState, ScaleState};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// One recorded phase-complete signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseCompletion {
    pub instance_name: String,
    /// Global state at the time of the signal, if one was set
    pub state: Option<ExecutionState>,
}

/// One recorded instance removal request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRemoval {
    pub node_name: String,
    pub ids: Vec<u32>,
}

#[derive(Debug)]
struct RunServiceState {
    run: RunDocument,
    parameters: HashMap<String, String>,
    completions: Vec<PhaseCompletion>,
    removals: Vec<InstanceRemoval>,
    deleted: bool,
}

impl RunServiceState {
    fn current_state(&self) -> Option<ExecutionState> {
        self.parameters
            .get(global_parameters::STATE)
            .and_then(|value| value.parse().ok())
    }

    fn render_run(&self) -> RunDocument {
        let mut run = self.run.clone();
        for instance in &mut run.instances {
            if let Some(state) = self
                .parameters
                .get(&qualify(instance_parameters::SCALE_STATE, &instance.name))
                .and_then(|value| value.parse::<ScaleState>().ok())
            {
                instance.scale_state = Some(state);
            }
            if let Some(id) = self
                .parameters
                .get(&qualify(instance_parameters::INSTANCE_ID, &instance.name))
                .filter(|value| !value.is_empty())
            {
                instance.cloud_resource_id = Some(id.clone());
            }
            if let Some(ip) = self
                .parameters
                .get(&qualify(instance_parameters::HOSTNAME, &instance.name))
                .filter(|value| !value.is_empty())
            {
                instance.ip_address = Some(ip.clone());
            }
        }
        run.parameters.extend(
            self.parameters
                .iter()
                .filter(|(key, _)| key.starts_with("ss:"))
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        run
    }
}

/// Shared in-memory run service; clone freely, all clones see the same run
#[derive(Debug, Clone)]
pub struct InMemoryRunService {
    state: Arc<Mutex<RunServiceState>>,
    clients_created: Arc<AtomicUsize>,
}

impl InMemoryRunService {
    /// Seed the service with a run; instance scale states become runtime parameters
    pub fn new(run: RunDocument) -> Self {
        let mut parameters = HashMap::new();
        for instance in &run.instances {
            if let Some(state) = instance.scale_state {
                parameters.insert(
                    qualify(instance_parameters::SCALE_STATE, &instance.name),
                    state.to_string(),
                );
            }
            if let Some(id) = &instance.cloud_resource_id {
                parameters.insert(
                    qualify(instance_parameters::INSTANCE_ID, &instance.name),
                    id.clone(),
                );
            }
        }
        parameters.extend(run.parameters.clone());

        Self {
            state: Arc::new(Mutex::new(RunServiceState {
                run,
                parameters,
                completions: Vec::new(),
                removals: Vec::new(),
                deleted: false,
            })),
            clients_created: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A new independent client
    pub fn client(&self) -> InMemoryParameterStore {
        self.clients_created.fetch_add(1, Ordering::SeqCst);
        InMemoryParameterStore {
            service: self.clone(),
        }
    }

    pub fn factory(&self) -> Arc<dyn ParameterStoreFactory> {
        Arc::new(InMemoryParameterStoreFactory {
            service: self.clone(),
        })
    }

    /// Number of clients handed out so far
    pub fn clients_created(&self) -> usize {
        self.clients_created.load(Ordering::SeqCst)
    }

    pub fn set_parameter(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.lock().parameters.insert(key.into(), value.into());
    }

    pub fn parameter(&self, key: &str) -> Option<String> {
        self.state.lock().parameters.get(key).cloned()
    }

    pub fn set_global_state(&self, state: ExecutionState) {
        self.set_parameter(global_parameters::STATE, state.to_string());
    }

    /// Add an instance to the run, as a scale-out request would
    pub fn add_instance(&self, instance: NodeInstance) {
        let mut state = self.state.lock();
        if let Some(scale_state) = instance.scale_state {
            state.parameters.insert(
                qualify(instance_parameters::SCALE_STATE, &instance.name),
                scale_state.to_string(),
            );
        }
        state.run.instances.push(instance);
    }

    pub fn set_scale_state(&self, instance_name: &str, state: ScaleState) {
        self.set_parameter(
            qualify(instance_parameters::SCALE_STATE, instance_name),
            state.to_string(),
        );
    }

    pub fn scale_state(&self, instance_name: &str) -> Option<ScaleState> {
        self.parameter(&qualify(instance_parameters::SCALE_STATE, instance_name))
            .and_then(|value| value.parse().ok())
    }

    pub fn set_mutable(&self, mutable: bool) {
        self.state.lock().run.mutable = mutable;
    }

    pub fn completions(&self) -> Vec<PhaseCompletion> {
        self.state.lock().completions.clone()
    }

    /// Instances that signalled completion while the run was in `state`
    pub fn completed_in(&self, state: ExecutionState) -> Vec<String> {
        self.state
            .lock()
            .completions
            .iter()
            .filter(|completion| completion.state == Some(state))
            .map(|completion| completion.instance_name.clone())
            .collect()
    }

    pub fn removals(&self) -> Vec<InstanceRemoval> {
        self.state.lock().removals.clone()
    }

    pub fn is_deleted(&self) -> bool {
        self.state.lock().deleted
    }

    /// Current view of the run, as clients would see it
    pub fn run(&self) -> RunDocument {
        self.state.lock().render_run()
    }
}

/// Client handle for [`InMemoryRunService`]
#[derive(Debug)]
pub struct InMemoryParameterStore {
    service: InMemoryRunService,
}

impl InMemoryParameterStore {
    fn ensure_live(&self, operation: &str) -> Result<()> {
        if self.service.state.lock().deleted {
            return Err(DeployerError::service(operation, "run has been deleted"));
        }
        Ok(())
    }
}

#[async_trait]
impl ParameterStore for InMemoryParameterStore {
    async fn get_runtime_parameter(&mut self, key: &str) -> Result<Option<String>> {
        self.ensure_live("get_runtime_parameter")?;
        Ok(self.service.parameter(key))
    }

    async fn set_runtime_parameter(&mut self, key: &str, value: &str) -> Result<()> {
        self.ensure_live("set_runtime_parameter")?;
        debug!(key = key, value = value, "Setting runtime parameter");
        self.service.set_parameter(key, value);
        Ok(())
    }

    async fn delete_runtime_parameter(&mut self, key: &str) -> Result<()> {
        self.ensure_live("delete_runtime_parameter")?;
        self.service.state.lock().parameters.remove(key);
        Ok(())
    }

    async fn get_run_document(&mut self) -> Result<RunDocument> {
        self.ensure_live("get_run_document")?;
        Ok(self.service.run())
    }

    async fn signal_phase_complete(&mut self, instance_name: &str) -> Result<()> {
        self.ensure_live("signal_phase_complete")?;
        let mut state = self.service.state.lock();
        let current = state.current_state();
        state.completions.push(PhaseCompletion {
            instance_name: instance_name.to_string(),
            state: current,
        });
        Ok(())
    }

    async fn remove_instances(&mut self, node_name: &str, ids: &[u32]) -> Result<()> {
        self.ensure_live("remove_instances")?;
        self.service.state.lock().removals.push(InstanceRemoval {
            node_name: node_name.to_string(),
            ids: ids.to_vec(),
        });
        Ok(())
    }

    async fn delete_run(&mut self) -> Result<()> {
        self.ensure_live("delete_run")?;
        self.service.state.lock().deleted = true;
        Ok(())
    }
}

#[derive(Debug)]
struct InMemoryParameterStoreFactory {
    service: InMemoryRunService,
}

impl ParameterStoreFactory for InMemoryParameterStoreFactory {
    fn create(&self) -> Result<Box<dyn ParameterStore>> {
        Ok(Box::new(self.service.client()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeInstance, RunCategory};
    use uuid::Uuid;

    fn service() -> InMemoryRunService {
        let mut run = RunDocument::new(Uuid::new_v4(), RunCategory::Deployment);
        run.instances.push(NodeInstance::orchestrator("cloud-a"));
        run.instances.push(NodeInstance::new("web", 1, "cloud-a"));
        InMemoryRunService::new(run)
    }

    #[tokio::test]
    async fn test_clients_share_state() {
        let service = service();
        let mut first = service.client();
        let mut second = service.client();

        first.set_runtime_parameter("web.1:hostname", "10.0.0.1").await.unwrap();
        assert_eq!(
            second.get_runtime_parameter("web.1:hostname").await.unwrap(),
            Some("10.0.0.1".to_string())
        );
        assert_eq!(service.clients_created(), 2);
    }

    #[tokio::test]
    async fn test_run_document_reflects_parameters() {
        let service = service();
        let mut client = service.client();
        assert_eq!(service.scale_state("web.1"), Some(ScaleState::Creating));

        client.set_runtime_parameter("web.1:scale.state", "created").await.unwrap();
        client.set_runtime_parameter("web.1:instanceid", "vm-42").await.unwrap();

        let run = client.get_run_document().await.unwrap();
        let web = run.instance("web.1").unwrap();
        assert_eq!(web.scale_state, Some(ScaleState::Created));
        assert_eq!(web.cloud_resource_id.as_deref(), Some("vm-42"));
    }

    #[tokio::test]
    async fn test_completions_record_global_state() {
        let service = service();
        service.set_global_state(ExecutionState::Provisioning);
        let mut client = service.client();
        client.signal_phase_complete("web.1").await.unwrap();

        assert_eq!(service.completed_in(ExecutionState::Provisioning), vec!["web.1"]);
        assert!(service.completed_in(ExecutionState::Executing).is_empty());
    }

    #[tokio::test]
    async fn test_deleted_run_rejects_calls() {
        let service = service();
        let mut client = service.client();
        client.delete_run().await.unwrap();
        assert!(service.is_deleted());
        assert!(client.get_runtime_parameter("ss:state").await.is_err());
    }
}
