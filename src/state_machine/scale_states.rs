use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-instance scaling lifecycle marker, distinct from the execution phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleState {
    Creating,
    Created,
    Removing,
    Removed,
    Gone,
    Resizing,
    Resized,
    DiskAttaching,
    DiskAttached,
    DiskDetaching,
    DiskDetached,
    /// Steady state, no operation in flight
    Operational,
}

/// Family of a scaling operation; one class may be in flight per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleClass {
    Creation,
    Removal,
    Resize,
    DiskAttach,
    DiskDetach,
    Steady,
}

impl ScaleState {
    pub const ALL: [ScaleState; 12] = [
        Self::Creating,
        Self::Created,
        Self::Removing,
        Self::Removed,
        Self::Gone,
        Self::Resizing,
        Self::Resized,
        Self::DiskAttaching,
        Self::DiskAttached,
        Self::DiskDetaching,
        Self::DiskDetached,
        Self::Operational,
    ];

    /// Terminal for the purpose of "is this instance mid-operation"
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Operational | Self::Gone)
    }

    pub fn class(&self) -> ScaleClass {
        match self {
            Self::Creating | Self::Created => ScaleClass::Creation,
            Self::Removing | Self::Removed | Self::Gone => ScaleClass::Removal,
            Self::Resizing | Self::Resized => ScaleClass::Resize,
            Self::DiskAttaching | Self::DiskAttached => ScaleClass::DiskAttach,
            Self::DiskDetaching | Self::DiskDetached => ScaleClass::DiskDetach,
            Self::Operational => ScaleClass::Steady,
        }
    }

    /// Whether the orchestrator still has to act on an instance in this state
    pub fn is_pending_action(&self) -> bool {
        matches!(
            self,
            Self::Creating
                | Self::Removing
                | Self::Resizing
                | Self::DiskAttaching
                | Self::DiskDetaching
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Removing => "removing",
            Self::Removed => "removed",
            Self::Gone => "gone",
            Self::Resizing => "resizing",
            Self::Resized => "resized",
            Self::DiskAttaching => "disk_attaching",
            Self::DiskAttached => "disk_attached",
            Self::DiskDetaching => "disk_detaching",
            Self::DiskDetached => "disk_detached",
            Self::Operational => "operational",
        }
    }
}

impl ScaleClass {
    /// Classes that act on existing instances of a single node type
    pub fn is_vertical(&self) -> bool {
        matches!(self, Self::Resize | Self::DiskAttach | Self::DiskDetach)
    }
}

impl fmt::Display for ScaleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScaleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Invalid scale state: {s}"))
    }
}

impl Default for ScaleState {
    fn default() -> Self {
        Self::Operational
    }
}
