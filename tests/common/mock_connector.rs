//! Scriptable cloud connector for integration tests.
//!
//! Machines live in memory. Instances configured as failing start fine but are
//! listed by the provider in `error` state; rejected instances fail to start.

use async_trait::async_trait;
use deployer_core::cloud::{Capability, CapabilitySet, CloudConnector, StartRequest, UserInfo, VmHandle};
use deployer_core::error::{DeployerError, Result};
use deployer_core::models::NodeInstance;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Default)]
struct MockCloudState {
    vms: BTreeMap<String, VmHandle>,
    started: Vec<String>,
    batches: Vec<Vec<String>>,
    stopped: Vec<String>,
    user_data: HashMap<String, String>,
    resized: Vec<String>,
    attached: Vec<String>,
    detached: Vec<String>,
}

#[derive(Debug)]
pub struct MockConnector {
    cloud: String,
    capabilities: CapabilitySet,
    failing_at_provider: HashSet<String>,
    rejected: HashSet<String>,
    state: Mutex<MockCloudState>,
}

impl MockConnector {
    pub fn new(cloud: impl Into<String>) -> Self {
        Self {
            cloud: cloud.into(),
            capabilities: CapabilitySet::new(),
            failing_at_provider: HashSet::new(),
            rejected: HashSet::new(),
            state: Mutex::new(MockCloudState::default()),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities = self.capabilities.with(capability);
        self
    }

    /// The provider will report this instance's machine as failed
    pub fn failing_at_provider(mut self, instance_name: &str) -> Self {
        self.failing_at_provider.insert(instance_name.to_string());
        self
    }

    /// Starting this instance returns an error
    pub fn rejecting(mut self, instance_name: &str) -> Self {
        self.rejected.insert(instance_name.to_string());
        self
    }

    pub fn vm_id(&self, instance_name: &str) -> String {
        format!("{}-{instance_name}", self.cloud)
    }

    pub fn is_failing(&self, instance_name: &str) -> bool {
        self.failing_at_provider.contains(instance_name)
    }

    /// Instance names in start order
    pub fn started(&self) -> Vec<String> {
        self.state.lock().started.clone()
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.state.lock().batches.clone()
    }

    /// Machine ids in stop order
    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().stopped.clone()
    }

    pub fn user_data(&self, instance_name: &str) -> Option<String> {
        self.state.lock().user_data.get(instance_name).cloned()
    }

    pub fn resized(&self) -> Vec<String> {
        self.state.lock().resized.clone()
    }

    pub fn attached(&self) -> Vec<String> {
        self.state.lock().attached.clone()
    }

    pub fn detached(&self) -> Vec<String> {
        self.state.lock().detached.clone()
    }

    fn launch(&self, request: &StartRequest) -> Result<VmHandle> {
        let name = &request.instance.name;
        if self.rejected.contains(name) {
            return Err(DeployerError::cloud(
                &self.cloud,
                format!("quota exceeded starting {name}"),
            ));
        }

        let status = if self.is_failing(name) { "error" } else { "running" };
        let index = request.instance.index().unwrap_or(0);
        let vm = VmHandle::new(self.vm_id(name), status).with_ip(format!("10.0.0.{index}"));

        let mut state = self.state.lock();
        state.vms.insert(vm.id.clone(), vm.clone());
        state.started.push(name.clone());
        if let Some(user_data) = &request.user_data {
            state.user_data.insert(name.clone(), user_data.clone());
        }
        Ok(vm)
    }
}

#[async_trait]
impl CloudConnector for MockConnector {
    fn cloud_name(&self) -> &str {
        &self.cloud
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities.clone()
    }

    async fn start_instance(&self, _user: &UserInfo, request: &StartRequest) -> Result<VmHandle> {
        self.launch(request)
    }

    async fn start_instances(&self, _user: &UserInfo, requests: &[StartRequest]) -> Result<Vec<VmHandle>> {
        if !self.supports(Capability::VappGrouping) {
            return Err(DeployerError::not_implemented(&self.cloud, "start_instances"));
        }
        let vms = requests
            .iter()
            .map(|request| self.launch(request))
            .collect::<Result<Vec<_>>>()?;
        self.state.lock().batches.push(
            requests
                .iter()
                .map(|request| request.instance.name.clone())
                .collect(),
        );
        Ok(vms)
    }

    async fn stop_instances_by_ids(&self, ids: &[String]) -> Result<()> {
        let mut state = self.state.lock();
        for id in ids {
            state.vms.remove(id);
            state.stopped.push(id.clone());
        }
        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<VmHandle>> {
        Ok(self.state.lock().vms.values().cloned().collect())
    }

    async fn resize(&self, instance: &NodeInstance) -> Result<()> {
        self.state.lock().resized.push(instance.name.clone());
        Ok(())
    }

    async fn attach_disk(&self, instance: &NodeInstance) -> Result<String> {
        self.state.lock().attached.push(instance.name.clone());
        Ok("/dev/vdb".to_string())
    }

    async fn detach_disk(&self, instance: &NodeInstance) -> Result<()> {
        self.state.lock().detached.push(instance.name.clone());
        Ok(())
    }
}
