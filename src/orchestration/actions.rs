//! Provisioning actions run through the
//! [`ProvisioningCoordinator`](super::ProvisioningCoordinator).
//!
//! Start actions publish the provider id (and the IP for clouds that assign
//! it directly) so nodes and the tracker can find their machine. Vertical
//! scaling actions move the instance to the matching completed scale state.

use super::coordinator::ProvisioningAction;
use crate::cloud::{Capability, CloudConnector, ConnectorRegistry, StartRequest, UserInfo, VmHandle};
use crate::error::{DeployerError, Result};
use crate::models::NodeInstance;
use crate::parameters::RunWrapper;
use crate::state_machine::ScaleState;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// What contextualizing clouds pass to a new machine so it can find its run
#[derive(Debug, Clone, Default)]
pub struct BootstrapSettings {
    /// Run service base URL written into the user data
    pub service_url: String,
    /// Command the machine runs after exporting its identity
    pub command: Option<String>,
}

impl BootstrapSettings {
    pub fn user_data(&self, run_id: &uuid::Uuid, instance_name: &str) -> String {
        let mut script = format!(
            "#!/bin/sh\n\
             export DEPLOYER_SERVICE__BASE_URL={}\n\
             export DEPLOYER_SERVICE__RUN_ID={run_id}\n\
             export DEPLOYER_EXECUTOR__INSTANCE_NAME={instance_name}\n",
            self.service_url
        );
        if let Some(command) = &self.command {
            script.push_str(command);
            script.push('\n');
        }
        script
    }
}

async fn publish_started(
    wrapper: &mut RunWrapper,
    connector: &dyn CloudConnector,
    instance: &NodeInstance,
    vm: &VmHandle,
) -> Result<()> {
    let id = connector.instance_id(vm);
    wrapper.publish_instance_id(&instance.name, &id).await?;
    if connector.supports(Capability::DirectIpAssignment) {
        if let Some(ip) = connector.instance_ip(vm) {
            wrapper.publish_hostname(&instance.name, &ip).await?;
        }
    }
    info!(instance = %instance.name, cloud = %instance.cloud, vm_id = %id, "Instance started");
    Ok(())
}

async fn start_request(
    wrapper: &mut RunWrapper,
    connector: &dyn CloudConnector,
    bootstrap: &BootstrapSettings,
    instance: NodeInstance,
) -> Result<StartRequest> {
    let user_data = if connector.supports(Capability::Contextualization) {
        let run_id = wrapper.run().await?.run_id;
        Some(bootstrap.user_data(&run_id, &instance.name))
    } else {
        None
    };
    Ok(StartRequest {
        instance,
        user_data,
    })
}

/// Start a single instance
pub struct StartInstanceAction {
    registry: Arc<ConnectorRegistry>,
    user: Arc<UserInfo>,
    bootstrap: BootstrapSettings,
}

impl StartInstanceAction {
    pub fn new(registry: Arc<ConnectorRegistry>, user: Arc<UserInfo>, bootstrap: BootstrapSettings) -> Self {
        Self {
            registry,
            user,
            bootstrap,
        }
    }
}

#[async_trait]
impl ProvisioningAction<NodeInstance> for StartInstanceAction {
    fn name(&self) -> &'static str {
        "start_instance"
    }

    async fn execute(&self, wrapper: &mut RunWrapper, _task_name: &str, instance: NodeInstance) -> Result<()> {
        let connector = self.registry.get(&instance.cloud)?;
        let request = start_request(wrapper, connector.as_ref(), &self.bootstrap, instance).await?;
        let vm = connector.start_instance(&self.user, &request).await?;
        publish_started(wrapper, connector.as_ref(), &request.instance, &vm).await
    }
}

/// Start every instance of one cloud in a single batch; the task key is the cloud
pub struct StartInstanceGroupAction {
    registry: Arc<ConnectorRegistry>,
    user: Arc<UserInfo>,
    bootstrap: BootstrapSettings,
}

impl StartInstanceGroupAction {
    pub fn new(registry: Arc<ConnectorRegistry>, user: Arc<UserInfo>, bootstrap: BootstrapSettings) -> Self {
        Self {
            registry,
            user,
            bootstrap,
        }
    }
}

#[async_trait]
impl ProvisioningAction<Vec<NodeInstance>> for StartInstanceGroupAction {
    fn name(&self) -> &'static str {
        "start_instance_group"
    }

    async fn execute(&self, wrapper: &mut RunWrapper, cloud: &str, instances: Vec<NodeInstance>) -> Result<()> {
        let connector = self.registry.get(cloud)?;
        let mut requests = Vec::with_capacity(instances.len());
        for instance in instances {
            requests.push(start_request(wrapper, connector.as_ref(), &self.bootstrap, instance).await?);
        }

        let vms = connector.start_instances(&self.user, &requests).await?;
        if vms.len() != requests.len() {
            return Err(DeployerError::cloud(
                cloud,
                format!("started {} machines for {} instances", vms.len(), requests.len()),
            ));
        }
        for (request, vm) in requests.iter().zip(&vms) {
            publish_started(wrapper, connector.as_ref(), &request.instance, vm).await?;
        }
        Ok(())
    }
}

/// Stop the machines of one cloud; the task key is the cloud.
///
/// With `mark_removed`, instances that were `removing` move to `removed`.
pub struct StopInstancesAction {
    registry: Arc<ConnectorRegistry>,
    mark_removed: bool,
}

impl StopInstancesAction {
    pub fn new(registry: Arc<ConnectorRegistry>, mark_removed: bool) -> Self {
        Self {
            registry,
            mark_removed,
        }
    }
}

#[async_trait]
impl ProvisioningAction<Vec<NodeInstance>> for StopInstancesAction {
    fn name(&self) -> &'static str {
        "stop_instances"
    }

    async fn execute(&self, wrapper: &mut RunWrapper, cloud: &str, instances: Vec<NodeInstance>) -> Result<()> {
        let connector = self.registry.get(cloud)?;
        let mut ids = Vec::with_capacity(instances.len());
        for instance in &instances {
            match wrapper.instance_id(&instance.name).await? {
                Some(id) => ids.push(id),
                None => warn!(instance = %instance.name, "No provider id known, nothing to stop"),
            }
        }
        if !ids.is_empty() {
            connector.stop_instances_by_ids(&ids).await?;
            info!(cloud = cloud, count = ids.len(), "Stopped instances");
        }

        if self.mark_removed {
            for instance in &instances {
                wrapper.set_scale_state(&instance.name, ScaleState::Removed).await?;
            }
        }
        Ok(())
    }
}

/// Vertical scaling operation applied to one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalOperation {
    Resize,
    AttachDisk,
    DetachDisk,
}

impl VerticalOperation {
    /// Operation that drives an instance out of the given pending state
    pub fn for_state(state: ScaleState) -> Option<Self> {
        match state {
            ScaleState::Resizing => Some(Self::Resize),
            ScaleState::DiskAttaching => Some(Self::AttachDisk),
            ScaleState::DiskDetaching => Some(Self::DetachDisk),
            _ => None,
        }
    }

    pub fn completed_state(&self) -> ScaleState {
        match self {
            Self::Resize => ScaleState::Resized,
            Self::AttachDisk => ScaleState::DiskAttached,
            Self::DetachDisk => ScaleState::DiskDetached,
        }
    }

    /// Capability a connector must declare to be asked for this operation
    pub fn required_capability(&self) -> Capability {
        match self {
            Self::Resize => Capability::Resize,
            Self::AttachDisk => Capability::DiskAttach,
            Self::DetachDisk => Capability::DiskDetach,
        }
    }
}

pub struct VerticalScaleAction {
    registry: Arc<ConnectorRegistry>,
    operation: VerticalOperation,
}

impl VerticalScaleAction {
    pub fn new(registry: Arc<ConnectorRegistry>, operation: VerticalOperation) -> Self {
        Self { registry, operation }
    }
}

#[async_trait]
impl ProvisioningAction<NodeInstance> for VerticalScaleAction {
    fn name(&self) -> &'static str {
        match self.operation {
            VerticalOperation::Resize => "resize",
            VerticalOperation::AttachDisk => "attach_disk",
            VerticalOperation::DetachDisk => "detach_disk",
        }
    }

    async fn execute(&self, wrapper: &mut RunWrapper, _task_name: &str, instance: NodeInstance) -> Result<()> {
        let connector = self.registry.get(&instance.cloud)?;
        let capability = self.operation.required_capability();
        if !connector.supports(capability) {
            return Err(DeployerError::unsupported(&instance.cloud, capability));
        }
        match self.operation {
            VerticalOperation::Resize => connector.resize(&instance).await?,
            VerticalOperation::AttachDisk => {
                let device = connector.attach_disk(&instance).await?;
                wrapper.publish_attached_device(&instance.name, &device).await?;
            }
            VerticalOperation::DetachDisk => connector.detach_disk(&instance).await?,
        }
        wrapper
            .set_scale_state(&instance.name, self.operation.completed_state())
            .await
    }
}
