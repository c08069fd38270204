//! # Runtime Parameter Names and Namespaces
//!
//! Names of the runtime parameters shared between the orchestrator, the node
//! instance executors and the remote run service, plus the namespace markers the
//! key qualifier relies on.

/// Separator between a namespace (node, instance, global) and a property
pub const NODE_PROPERTY_SEPARATOR: char = ':';

/// Separator between a node name and its multiplicity index
pub const NODE_MULTIPLICITY_SEPARATOR: char = '.';

/// Index inserted when a node-scoped key omits the multiplicity index
pub const DEFAULT_NODE_INDEX: u32 = 1;

/// Namespace prefixes that are never rewritten by the key qualifier
pub mod namespaces {
    pub const GLOBAL: &str = "ss";
    pub const MACHINE: &str = "machine";
    pub const ORCHESTRATOR: &str = "orchestrator";
    /// Orchestrator names may carry a cloud suffix, e.g. `orchestrator-exoscale`
    pub const ORCHESTRATOR_SUFFIX_SEPARATOR: char = '-';
}

/// Properties that live at node-type level rather than on an instance
pub const NODE_LEVEL_PROPERTIES: &[&str] = &[node_properties::MULTIPLICITY, node_properties::IDS];

/// Global runtime parameters
pub mod global_parameters {
    pub const STATE: &str = "ss:state";
    pub const ABORT: &str = "ss:abort";
}

/// Node-type level parameters
pub mod node_properties {
    pub const MULTIPLICITY: &str = "multiplicity";
    pub const IDS: &str = "ids";
}

/// Node-instance level parameters
pub mod instance_parameters {
    pub const ABORT: &str = "abort";
    pub const COMPLETE: &str = "complete";
    pub const SCALE_STATE: &str = "scale.state";
    pub const INSTANCE_ID: &str = "instanceid";
    pub const HOSTNAME: &str = "hostname";
    pub const DISK_ATTACHED_DEVICE: &str = "disk.attached.device";
}

/// Environment variables understood by the crate
pub mod env {
    pub const ENVIRONMENT: &str = "DEPLOYER_ENV";
    pub const CONFIG_PATH: &str = "DEPLOYER_CONFIG_PATH";
    pub const CONFIG_PREFIX: &str = "DEPLOYER";
    pub const LOG_DIR: &str = "DEPLOYER_LOG_DIR";
}
