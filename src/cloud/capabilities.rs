use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Optional features a cloud connector may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Instances accept user data and bootstrap themselves
    Contextualization,
    /// The provider hands out the instance IP directly at start
    DirectIpAssignment,
    /// Instances of a cloud must be started together in one batch
    VappGrouping,
    Resize,
    DiskAttach,
    DiskDetach,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Contextualization => "contextualization",
            Self::DirectIpAssignment => "direct_ip_assignment",
            Self::VappGrouping => "vapp_grouping",
            Self::Resize => "resize",
            Self::DiskAttach => "disk_attach",
            Self::DiskDetach => "disk_detach",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(HashSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
