//! # Cloud Connector Contract
//!
//! What the orchestrator needs from a provider. Optional operations default to
//! [`DeployerError::NotImplemented`]; connectors advertise what they support
//! through [`CloudConnector::capabilities`].

use super::capabilities::{Capability, CapabilitySet};
use crate::error::{DeployerError, Result};
use crate::models::NodeInstance;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Provider-side view of a virtual machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmHandle {
    pub id: String,
    #[serde(default)]
    pub ip: Option<String>,
    /// Provider state string, e.g. `running` or `error`
    pub state: String,
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl VmHandle {
    pub fn new(id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ip: None,
            state: state.into(),
            raw: serde_json::Value::Null,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }
}

/// Credentials and keys of the run owner
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    #[serde(default)]
    pub ssh_public_keys: Vec<String>,
    /// Per-cloud credential maps, keyed by cloud name
    #[serde(default)]
    pub cloud_credentials: HashMap<String, HashMap<String, String>>,
}

impl fmt::Debug for UserInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserInfo")
            .field("username", &self.username)
            .field("ssh_public_keys", &self.ssh_public_keys.len())
            .field(
                "cloud_credentials",
                &self.cloud_credentials.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl UserInfo {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    pub fn credentials_for(&self, cloud: &str) -> Option<&HashMap<String, String>> {
        self.cloud_credentials.get(cloud)
    }
}

/// One instance to start, with bootstrap user data for contextualizing clouds
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub instance: NodeInstance,
    pub user_data: Option<String>,
}

#[async_trait]
pub trait CloudConnector: Send + Sync + fmt::Debug {
    fn cloud_name(&self) -> &str;

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new()
    }

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(capability)
    }

    async fn start_instance(&self, user: &UserInfo, request: &StartRequest) -> Result<VmHandle>;

    /// Start a group of instances at once; required with [`Capability::VappGrouping`].
    /// Handles are returned in request order.
    async fn start_instances(
        &self,
        _user: &UserInfo,
        _requests: &[StartRequest],
    ) -> Result<Vec<VmHandle>> {
        Err(DeployerError::not_implemented(
            self.cloud_name(),
            "start_instances",
        ))
    }

    async fn stop_instances_by_ids(&self, ids: &[String]) -> Result<()>;

    async fn list_instances(&self) -> Result<Vec<VmHandle>>;

    fn instance_id(&self, vm: &VmHandle) -> String {
        vm.id.clone()
    }

    fn instance_ip(&self, vm: &VmHandle) -> Option<String> {
        vm.ip.clone()
    }

    /// Whether the provider reports the machine as failed
    fn has_failed(&self, vm: &VmHandle) -> bool {
        matches!(
            vm.state.to_ascii_lowercase().as_str(),
            "error" | "failed" | "failure"
        )
    }

    async fn resize(&self, _instance: &NodeInstance) -> Result<()> {
        Err(DeployerError::not_implemented(self.cloud_name(), "resize"))
    }

    /// Attach a disk and return the device name it appeared as
    async fn attach_disk(&self, _instance: &NodeInstance) -> Result<String> {
        Err(DeployerError::not_implemented(
            self.cloud_name(),
            "attach_disk",
        ))
    }

    async fn detach_disk(&self, _instance: &NodeInstance) -> Result<()> {
        Err(DeployerError::not_implemented(
            self.cloud_name(),
            "detach_disk",
        ))
    }
}
