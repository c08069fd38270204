//! # Key Qualifier
//!
//! Maps a short runtime parameter name to its fully-qualified, namespaced key.
//!
//! Rules, in order:
//!
//! 1. keys already in a reserved namespace (`ss:`, `machine:`, `orchestrator…:`)
//!    are returned unchanged;
//! 2. `node:property` keys keep orchestrator namespaces as they are, and get the
//!    default index inserted (`web:disk` → `web.1:disk`) unless the node part
//!    already carries one or the property is node-level (`multiplicity`, `ids`);
//! 3. bare properties are scoped to the current node (node-level properties) or
//!    to the current instance (everything else).
//!
//! Qualification is idempotent for every instance name accepted by
//! [`validate_instance_name`].

use crate::constants::{
    namespaces, DEFAULT_NODE_INDEX, NODE_LEVEL_PROPERTIES, NODE_MULTIPLICITY_SEPARATOR,
    NODE_PROPERTY_SEPARATOR,
};
use crate::error::{DeployerError, Result};

/// Qualify `raw_key` relative to `instance_name`
pub fn qualify(raw_key: &str, instance_name: &str) -> String {
    if is_reserved(raw_key) {
        return raw_key.to_string();
    }

    if let Some((node_part, property)) = raw_key.split_once(NODE_PROPERTY_SEPARATOR) {
        if is_orchestrator_name(node_part)
            || has_multiplicity_index(node_part)
            || is_node_level_property(property)
        {
            return raw_key.to_string();
        }
        return format!(
            "{node_part}{NODE_MULTIPLICITY_SEPARATOR}{DEFAULT_NODE_INDEX}{NODE_PROPERTY_SEPARATOR}{property}"
        );
    }

    if is_node_level_property(raw_key) {
        format!(
            "{}{NODE_PROPERTY_SEPARATOR}{raw_key}",
            strip_multiplicity_index(instance_name)
        )
    } else {
        format!(
            "{}{NODE_PROPERTY_SEPARATOR}{raw_key}",
            canonical_instance_name(instance_name)
        )
    }
}

/// Reject names a qualified key could not carry unambiguously
pub fn validate_instance_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.contains(NODE_PROPERTY_SEPARATOR) {
        "must not contain the property separator ':'"
    } else if name.chars().any(char::is_whitespace) {
        "must not contain whitespace"
    } else {
        return Ok(());
    };
    Err(DeployerError::InvalidInstanceName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// Instance-bound qualifier injected into run wrappers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyQualifier {
    instance_name: String,
}

impl KeyQualifier {
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
        }
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn qualify(&self, raw_key: &str) -> String {
        qualify(raw_key, &self.instance_name)
    }

    /// Key of `property` on another instance, e.g. `web.2:scale.state`
    pub fn for_instance(&self, instance_name: &str, property: &str) -> String {
        qualify(property, instance_name)
    }
}

/// Whether `name` is an orchestrator name: `orchestrator` or `orchestrator-<suffix>`
pub fn is_orchestrator_name(name: &str) -> bool {
    match name.strip_prefix(namespaces::ORCHESTRATOR) {
        Some("") => true,
        Some(rest) => rest.starts_with(namespaces::ORCHESTRATOR_SUFFIX_SEPARATOR),
        None => false,
    }
}

/// Whether `name` ends with a numeric `.N` multiplicity index
pub fn has_multiplicity_index(name: &str) -> bool {
    name.rsplit_once(NODE_MULTIPLICITY_SEPARATOR)
        .map(|(_, index)| !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// Node name with any multiplicity index removed (`web.3` → `web`)
pub fn strip_multiplicity_index(name: &str) -> &str {
    if has_multiplicity_index(name) {
        name.rsplit_once(NODE_MULTIPLICITY_SEPARATOR)
            .map(|(node, _)| node)
            .unwrap_or(name)
    } else {
        name
    }
}

pub fn is_node_level_property(property: &str) -> bool {
    NODE_LEVEL_PROPERTIES.contains(&property)
}

fn is_reserved(key: &str) -> bool {
    match key.split_once(NODE_PROPERTY_SEPARATOR) {
        Some((namespace, _)) => {
            namespace == namespaces::GLOBAL
                || namespace == namespaces::MACHINE
                || is_orchestrator_name(namespace)
        }
        None => false,
    }
}

// instance-scoped keys always carry an index unless they belong to an orchestrator
fn canonical_instance_name(instance_name: &str) -> String {
    if is_orchestrator_name(instance_name) || has_multiplicity_index(instance_name) {
        instance_name.to_string()
    } else {
        format!("{instance_name}{NODE_MULTIPLICITY_SEPARATOR}{DEFAULT_NODE_INDEX}")
    }
}
