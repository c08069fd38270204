//! # Node Instance Model
//!
//! One provisioned (or to-be-provisioned) resource of a node, named
//! `<node>.<index>`. The orchestrator is itself a node instance flagged with
//! `is_orchestrator` and named `orchestrator-<cloud>`.

use crate::constants::NODE_MULTIPLICITY_SEPARATOR;
use crate::state_machine::ScaleState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInstance {
    /// `<node_name>.<index>`, or the orchestrator name
    pub name: String,
    pub node_name: String,
    /// Cloud / provider identifier used to select a connector
    pub cloud: String,
    #[serde(default)]
    pub cloud_parameters: HashMap<String, String>,
    #[serde(default)]
    pub image_attributes: HashMap<String, String>,
    /// Last known scale state; may be stale while non-terminal
    #[serde(default)]
    pub scale_state: Option<ScaleState>,
    /// Provider resource id once started
    #[serde(default)]
    pub cloud_resource_id: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub max_provisioning_failures: u32,
    #[serde(default)]
    pub is_orchestrator: bool,
}

impl NodeInstance {
    /// Create a regular node instance `<node_name>.<index>` in `creating` state
    pub fn new(node_name: impl Into<String>, index: u32, cloud: impl Into<String>) -> Self {
        let node_name = node_name.into();
        Self {
            name: format!("{node_name}{NODE_MULTIPLICITY_SEPARATOR}{index}"),
            node_name,
            cloud: cloud.into(),
            cloud_parameters: HashMap::new(),
            image_attributes: HashMap::new(),
            scale_state: Some(ScaleState::Creating),
            cloud_resource_id: None,
            ip_address: None,
            max_provisioning_failures: 0,
            is_orchestrator: false,
        }
    }

    /// Create the orchestrator instance for a cloud
    pub fn orchestrator(cloud: impl Into<String>) -> Self {
        let cloud = cloud.into();
        let name = format!("orchestrator-{cloud}");
        Self {
            name: name.clone(),
            node_name: name,
            cloud,
            cloud_parameters: HashMap::new(),
            image_attributes: HashMap::new(),
            scale_state: Some(ScaleState::Operational),
            cloud_resource_id: None,
            ip_address: None,
            max_provisioning_failures: 0,
            is_orchestrator: true,
        }
    }

    pub fn with_max_provisioning_failures(mut self, max: u32) -> Self {
        self.max_provisioning_failures = max;
        self
    }

    pub fn with_scale_state(mut self, state: ScaleState) -> Self {
        self.scale_state = Some(state);
        self
    }

    pub fn with_cloud_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.cloud_parameters.insert(key.into(), value.into());
        self
    }

    /// Multiplicity index parsed from the instance name
    pub fn index(&self) -> Option<u32> {
        self.name
            .rsplit_once(NODE_MULTIPLICITY_SEPARATOR)
            .and_then(|(_, index)| index.parse().ok())
    }

    /// Scale state with a missing value read as `operational`
    pub fn cached_scale_state(&self) -> ScaleState {
        self.scale_state.unwrap_or_default()
    }
}
