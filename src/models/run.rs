//! # Run Model
//!
//! Structured run state as returned by the remote run service. The global
//! execution state and abort flag are runtime parameters and are read through
//! the run wrapper; the document carries the topology.

use super::node_instance::NodeInstance;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCategory {
    /// Single machine built and captured as an image
    ImageBuild,
    /// Multi-node deployment
    Deployment,
}

impl fmt::Display for RunCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageBuild => write!(f, "image_build"),
            Self::Deployment => write!(f, "deployment"),
        }
    }
}

/// Node-type level description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub name: String,
    pub cloud: String,
    pub multiplicity: u32,
    #[serde(default)]
    pub max_provisioning_failures: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDocument {
    pub run_id: Uuid,
    pub category: RunCategory,
    #[serde(default)]
    pub mutable: bool,
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    /// Ordered node instances, orchestrators included
    #[serde(default)]
    pub instances: Vec<NodeInstance>,
    /// Global parameters snapshot
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl RunDocument {
    pub fn new(run_id: Uuid, category: RunCategory) -> Self {
        Self {
            run_id,
            category,
            mutable: false,
            nodes: Vec::new(),
            instances: Vec::new(),
            parameters: HashMap::new(),
        }
    }

    pub fn instance(&self, name: &str) -> Option<&NodeInstance> {
        self.instances.iter().find(|instance| instance.name == name)
    }

    pub fn instance_mut(&mut self, name: &str) -> Option<&mut NodeInstance> {
        self.instances.iter_mut().find(|instance| instance.name == name)
    }

    /// Instances the orchestrator manages, i.e. everything but orchestrators
    pub fn node_instances(&self) -> impl Iterator<Item = &NodeInstance> {
        self.instances.iter().filter(|instance| !instance.is_orchestrator)
    }

    pub fn orchestrators(&self) -> impl Iterator<Item = &NodeInstance> {
        self.instances.iter().filter(|instance| instance.is_orchestrator)
    }

    /// Node instance names grouped by node type, sorted for stable iteration
    pub fn instances_by_node(&self) -> BTreeMap<String, Vec<String>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for instance in self.node_instances() {
            grouped
                .entry(instance.node_name.clone())
                .or_default()
                .push(instance.name.clone());
        }
        grouped
    }
}
